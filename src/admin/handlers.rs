use std::time::Instant;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::http::AppState;
use crate::security::rate_limit::ClientUsage;
use crate::security::session::SessionSummary;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub upstream_origin: String,
}

#[derive(Serialize)]
pub struct UpstreamStatus {
    pub active_connections: u64,
}

#[derive(Serialize)]
pub struct RateLimitReport {
    pub enabled: bool,
    pub max_requests: u32,
    pub window_secs: u64,
    pub clients: Vec<ClientUsage>,
}

#[derive(Serialize)]
pub struct SessionReport {
    pub enabled: bool,
    pub sessions: Vec<SessionSummary>,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started_at.elapsed().as_secs(),
        upstream_origin: state.proxy.validator().origin().to_string(),
    })
}

pub async fn get_upstream(State(state): State<AppState>) -> Json<UpstreamStatus> {
    Json(UpstreamStatus {
        active_connections: state.upstream.active(),
    })
}

pub async fn get_rate_limits(State(state): State<AppState>) -> Json<RateLimitReport> {
    let config = state.config.load();
    Json(RateLimitReport {
        enabled: config.rate_limit.enabled,
        max_requests: config.rate_limit.max_requests,
        window_secs: config.rate_limit.window_secs,
        clients: state.limiter.snapshot(&config.rate_limit, Instant::now()),
    })
}

pub async fn get_sessions(State(state): State<AppState>) -> Json<SessionReport> {
    Json(SessionReport {
        enabled: state.config.load().sessions.enabled,
        sessions: state.sessions.snapshot(Instant::now()),
    })
}
