//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with all handlers
//! - Wire up middleware (request id, tracing, timeout, body limit, security headers)
//! - Keep the request id on the request span; it is not echoed to clients
//! - Gate `/proxy` behind the rate limiter and session tracker
//! - Apply hot-reloaded configuration
//! - Run the store sweeper alongside the server
//! - Serve until the shutdown broadcast fires

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    http::Request,
    middleware::from_fn_with_state,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::GatewayConfig;
use crate::http::proxy::{health, proxy_handler, proxy_preflight, root};
use crate::http::request::{request_span, X_REQUEST_ID};
use crate::proxy::{AssetProxy, FetchError, UpstreamTracker};
use crate::security::headers::with_security_headers;
use crate::security::rate_limit::rate_limit_middleware;
use crate::security::session::session_middleware;
use crate::security::{
    InMemorySessionStore, RateLimitStore, SessionStore, SlidingWindowLimiter, StoreSweeper,
};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<AssetProxy>,
    pub config: Arc<ArcSwap<GatewayConfig>>,
    pub limiter: Arc<dyn RateLimitStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub upstream: UpstreamTracker,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: GatewayConfig, proxy: AssetProxy, upstream: UpstreamTracker) -> Self {
        Self {
            proxy: Arc::new(proxy),
            config: Arc::new(ArcSwap::from_pointee(config)),
            limiter: Arc::new(SlidingWindowLimiter::new()),
            sessions: Arc::new(InMemorySessionStore::new()),
            upstream,
            started_at: Instant::now(),
        }
    }
}

/// HTTP server for the asset gateway.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Server fetching from the trusted asset origin.
    pub fn new(config: GatewayConfig) -> Result<Self, FetchError> {
        let upstream = UpstreamTracker::new();
        let proxy = AssetProxy::from_config(&config.proxy, upstream.clone())?;
        Ok(Self::with_proxy(config, proxy, upstream))
    }

    /// Server around an already-built proxy. `upstream` must be the tracker
    /// the proxy's fetcher leases from.
    pub fn with_proxy(config: GatewayConfig, proxy: AssetProxy, upstream: UpstreamTracker) -> Self {
        let state = AppState::new(config, proxy, upstream);
        let router = Self::build_router(&state);
        Self { router, state }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(state: &AppState) -> Router {
        let config = state.config.load();

        let proxy_route = get(proxy_handler)
            .route_layer(from_fn_with_state(state.clone(), session_middleware))
            .route_layer(from_fn_with_state(state.clone(), rate_limit_middleware))
            .options(proxy_preflight);

        let router = Router::new()
            .route("/", get(root))
            .route("/health", get(health))
            .route("/proxy", proxy_route)
            .with_state(state.clone())
            .layer(RequestBodyLimitLayer::new(config.security.max_body_size))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| request_span(req)))
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid));

        if config.security.enable_headers {
            with_security_headers(router)
        } else {
            router
        }
    }

    /// Shared state, for the admin API and tests.
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// The fully layered router, for in-process tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener.
    ///
    /// New configs arriving on `config_updates` replace the shared config.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let shared = Arc::clone(&self.state.config);
        tokio::spawn(async move {
            while let Some(config) = config_updates.recv().await {
                tracing::info!(
                    rate_limit = config.rate_limit.enabled,
                    sessions = config.sessions.enabled,
                    "Applying reloaded configuration"
                );
                shared.store(Arc::new(config));
            }
        });

        let sweeper = StoreSweeper::new(
            Arc::clone(&self.state.limiter),
            Arc::clone(&self.state.sessions),
            Arc::clone(&self.state.config),
        );
        tokio::spawn(sweeper.run(shutdown.resubscribe()));

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server received shutdown signal");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
