//! Background purge of idle rate-limit windows and expired sessions.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::GatewayConfig;

use super::rate_limit::RateLimitStore;
use super::session::SessionStore;

pub struct StoreSweeper {
    limiter: Arc<dyn RateLimitStore>,
    sessions: Arc<dyn SessionStore>,
    config: Arc<ArcSwap<GatewayConfig>>,
}

impl StoreSweeper {
    pub fn new(
        limiter: Arc<dyn RateLimitStore>,
        sessions: Arc<dyn SessionStore>,
        config: Arc<ArcSwap<GatewayConfig>>,
    ) -> Self {
        Self { limiter, sessions, config }
    }

    /// Run until shutdown. The interval is read once at start.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let every = Duration::from_secs(self.config.load().sessions.sweep_interval_secs.max(1));
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        tracing::debug!(interval_secs = every.as_secs(), "Store sweeper started");

        loop {
            tokio::select! {
                _ = interval.tick() => self.sweep(Instant::now()),
                _ = shutdown.recv() => {
                    tracing::debug!("Store sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    pub fn sweep(&self, now: Instant) {
        let config = self.config.load();
        let windows = self.limiter.purge(&config.rate_limit, now);
        let sessions = self.sessions.purge(&config.sessions, now);
        if windows > 0 || sessions > 0 {
            tracing::debug!(windows, sessions, "Purged idle client state");
        }
    }
}
