//! DreamForge asset gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!     Browser                       ┌──────────────────────────────────────────┐
//!     GET /proxy?url=...  ─────────▶│ http::server (request id, trace, limits) │
//!                                   │   → security (rate limit, session)       │
//!                                   │   → proxy::validator                     │
//!                                   │   → proxy::fetcher ──────────────────────┼──▶ assets.meshy.ai
//!     ◀──── streamed bytes ─────────│   ◀ proxy::relay (one resume)  ◀─────────┼───
//!                                   └──────────────────────────────────────────┘
//!                                     config (TOML + watcher)  observability
//!                                     admin API (loopback)     lifecycle
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use dreamforge_gateway::admin::serve_admin;
use dreamforge_gateway::config::loader::{default_config, load_config};
use dreamforge_gateway::config::watcher::ConfigWatcher;
use dreamforge_gateway::lifecycle::{spawn_signal_handler, Shutdown};
use dreamforge_gateway::observability::{logging, metrics};
use dreamforge_gateway::HttpServer;

#[derive(Parser)]
#[command(name = "dreamforge-gateway", version)]
#[command(about = "Streaming proxy for 3D model assets", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Reload the configuration file when it changes.
    #[arg(long, requires = "config")]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => default_config()?,
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "dreamforge-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        upstream_timeout_secs = config.proxy.upstream_timeout_secs,
        rate_limit = config.rate_limit.enabled,
        sessions = config.sessions.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    // The watcher must outlive the server; dropping it stops notifications.
    let (updates_rx, _watcher) = match (&args.config, args.watch) {
        (Some(path), true) => {
            let (watcher, rx) = ConfigWatcher::new(path);
            (rx, Some(watcher.run()?))
        }
        _ => (tokio::sync::mpsc::unbounded_channel().1, None),
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let admin = config.admin.clone();
    let server = HttpServer::new(config)?;

    if admin.enabled {
        let admin_listener = TcpListener::bind(&admin.bind_address).await?;
        let state = server.state();
        let admin_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = serve_admin(admin_listener, state, admin_shutdown).await {
                tracing::error!(error = %e, "Admin API failed");
            }
        });
    }

    server.run(listener, updates_rx, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
