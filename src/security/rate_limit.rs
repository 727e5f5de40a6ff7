//! Per-client abuse rate limiting.
//!
//! Sliding window per client IP. The request that finds the window full is
//! rejected and blocks the client for `block_secs`; every request during the
//! block is rejected without touching the window.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{header::RETRY_AFTER, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::config::RateLimitConfig;
use crate::http::request::ClientAddr;
use crate::http::AppState;
use crate::observability::metrics;
use crate::proxy::response::cors_headers;

/// Outcome of one hit against the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    /// This request filled the window; the client is now blocked.
    Exceeded { retry_after: Duration },
    /// The client was already blocked.
    Blocked { retry_after: Duration },
}

/// Per-client usage, as reported by the admin API.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ClientUsage {
    pub client: String,
    pub requests_in_window: usize,
    pub blocked_for_secs: Option<u64>,
}

/// Storage behind the limiter. In-memory today; a shared store would let
/// several gateway replicas enforce one budget.
pub trait RateLimitStore: Send + Sync {
    fn hit(&self, client: &str, config: &RateLimitConfig, now: Instant) -> RateDecision;

    fn snapshot(&self, config: &RateLimitConfig, now: Instant) -> Vec<ClientUsage>;

    /// Drop idle windows and expired blocks. Returns how many clients were removed.
    fn purge(&self, config: &RateLimitConfig, now: Instant) -> usize;
}

#[derive(Debug, Default)]
struct ClientWindow {
    hits: VecDeque<Instant>,
    blocked_until: Option<Instant>,
}

impl ClientWindow {
    fn expire(&mut self, window: Duration, now: Instant) {
        while let Some(&oldest) = self.hits.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
        if self.blocked_until.is_some_and(|until| now >= until) {
            self.blocked_until = None;
        }
    }

    fn retry_after(&self, now: Instant) -> Option<Duration> {
        self.blocked_until.map(|until| until.saturating_duration_since(now))
    }
}

/// Sliding-window limiter keyed by client address.
#[derive(Debug, Default)]
pub struct SlidingWindowLimiter {
    clients: Mutex<HashMap<String, ClientWindow>>,
}

impl SlidingWindowLimiter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitStore for SlidingWindowLimiter {
    fn hit(&self, client: &str, config: &RateLimitConfig, now: Instant) -> RateDecision {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = clients.entry(client.to_string()).or_default();

        entry.expire(config.window(), now);
        if let Some(retry_after) = entry.retry_after(now) {
            return RateDecision::Blocked { retry_after };
        }

        if entry.hits.len() >= config.max_requests as usize {
            entry.blocked_until = Some(now + config.block_duration());
            return RateDecision::Exceeded { retry_after: config.block_duration() };
        }

        entry.hits.push_back(now);
        RateDecision::Allowed {
            remaining: config.max_requests.saturating_sub(entry.hits.len() as u32),
        }
    }

    fn snapshot(&self, config: &RateLimitConfig, now: Instant) -> Vec<ClientUsage> {
        let clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        let window = config.window();
        let mut usage: Vec<ClientUsage> = clients
            .iter()
            .map(|(client, entry)| ClientUsage {
                client: client.clone(),
                requests_in_window: entry
                    .hits
                    .iter()
                    .filter(|&&t| now.saturating_duration_since(t) < window)
                    .count(),
                blocked_for_secs: entry
                    .retry_after(now)
                    .filter(|d| !d.is_zero())
                    .map(|d| d.as_secs().max(1)),
            })
            .collect();
        usage.sort_by(|a, b| a.client.cmp(&b.client));
        usage
    }

    fn purge(&self, config: &RateLimitConfig, now: Instant) -> usize {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        let before = clients.len();
        clients.retain(|_, entry| {
            entry.expire(config.window(), now);
            !entry.hits.is_empty() || entry.blocked_until.is_some()
        });
        before - clients.len()
    }
}

/// Middleware applied to the proxy route.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    ClientAddr(client): ClientAddr,
    request: Request<Body>,
    next: Next,
) -> Response {
    let config = state.config.load_full();
    if !config.rate_limit.enabled {
        return next.run(request).await;
    }

    match state.limiter.hit(&client, &config.rate_limit, Instant::now()) {
        RateDecision::Allowed { .. } => next.run(request).await,
        RateDecision::Exceeded { retry_after } => {
            tracing::warn!(%client, block_secs = retry_after.as_secs(), "Rate limit exceeded, blocking client");
            metrics::record_rate_limited("window");
            too_many_requests(
                format!("Rate limit exceeded. IP blocked for {} seconds.", retry_after.as_secs()),
                retry_after,
            )
        }
        RateDecision::Blocked { retry_after } => {
            tracing::debug!(%client, "Request from blocked client");
            metrics::record_rate_limited("blocked");
            too_many_requests(
                format!(
                    "IP blocked due to excessive requests. Try again in {} seconds.",
                    retry_after.as_secs()
                ),
                retry_after,
            )
        }
    }
}

fn too_many_requests(detail: String, retry_after: Duration) -> Response {
    let body = Json(serde_json::json!({ "success": false, "detail": detail }));
    let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
    let headers = response.headers_mut();
    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after.as_secs().max(1)));
    cors_headers(headers);
    response
}
