//! Hot reload of the gateway config file.
//!
//! The directory holding the file is watched rather than the file itself:
//! editors that save by writing a temp file and renaming it over the
//! original replace the inode, and a file-level watch goes quiet after the
//! first such save.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::GatewayConfig;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Sends a freshly validated [`GatewayConfig`] whenever the file changes.
pub struct ConfigWatcher {
    file: PathBuf,
    updates: mpsc::UnboundedSender<GatewayConfig>,
}

impl ConfigWatcher {
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<GatewayConfig>) {
        let (updates, rx) = mpsc::unbounded_channel();
        let watcher = Self { file: path.to_path_buf(), updates };
        (watcher, rx)
    }

    /// Start watching. Dropping the returned handle stops it.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let dir = watched_dir(&self.file);
        let name = self.file.file_name().map(OsString::from);
        let Self { file, updates } = self;

        let handler = move |res: notify::Result<Event>| match res {
            Ok(event) if touches(&event, name.as_deref()) => reload(&file, &updates),
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Config watch error"),
        };

        let mut watcher =
            RecommendedWatcher::new(handler, Config::default().with_poll_interval(POLL_INTERVAL))?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(dir = %dir.display(), "Watching config for changes");
        Ok(watcher)
    }
}

fn watched_dir(file: &Path) -> PathBuf {
    match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Whether `event` is a write, create or rename of the config file.
fn touches(event: &Event, name: Option<&std::ffi::OsStr>) -> bool {
    let relevant = matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_));
    relevant && event.paths.iter().any(|p| p.file_name() == name)
}

fn reload(file: &Path, updates: &mpsc::UnboundedSender<GatewayConfig>) {
    match load_config(file) {
        Ok(config) => {
            tracing::info!(path = %file.display(), "Config reloaded");
            if updates.send(config).is_err() {
                tracing::debug!("Config receiver gone, dropping reload");
            }
        }
        // half-written saves land here too; the next event retries
        Err(e) => tracing::warn!(path = %file.display(), error = %e, "Ignoring invalid config edit"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};

    #[test]
    fn only_events_on_the_config_file_count() {
        let name = Some(std::ffi::OsStr::new("gateway.toml"));

        let write = Event::new(EventKind::Modify(ModifyKind::Any)).add_path("/etc/df/gateway.toml".into());
        assert!(touches(&write, name));

        let renamed_in = Event::new(EventKind::Create(CreateKind::File)).add_path("/etc/df/gateway.toml".into());
        assert!(touches(&renamed_in, name));

        let neighbour = Event::new(EventKind::Modify(ModifyKind::Any)).add_path("/etc/df/.gateway.toml.swp".into());
        assert!(!touches(&neighbour, name));

        let removed = Event::new(EventKind::Remove(RemoveKind::File)).add_path("/etc/df/gateway.toml".into());
        assert!(!touches(&removed, name));
    }

    #[test]
    fn bare_file_name_watches_current_dir() {
        assert_eq!(watched_dir(Path::new("gateway.toml")), PathBuf::from("."));
        assert_eq!(watched_dir(Path::new("/etc/df/gateway.toml")), PathBuf::from("/etc/df"));
    }

    #[test]
    fn valid_edit_is_forwarded_and_invalid_one_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("gateway.toml");
        let (watcher, mut rx) = ConfigWatcher::new(&file);

        std::fs::write(&file, "[listener]\nbind_address = \"not an address\"\n").unwrap();
        reload(&watcher.file, &watcher.updates);
        assert!(rx.try_recv().is_err());

        std::fs::write(&file, "[rate_limit]\nmax_requests = 7\n").unwrap();
        reload(&watcher.file, &watcher.updates);
        assert_eq!(rx.try_recv().unwrap().rate_limit.max_requests, 7);
    }
}
