//! Anonymous session tracking.
//!
//! Clients carry a session id in `X-Session-ID` (or a `session_id` cookie).
//! Unknown ids and sessions idle past the timeout get a fresh id; the
//! response always echoes the id in use. A session that exceeds its request
//! budget is blocked and stays blocked until swept.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{header::COOKIE, HeaderMap, HeaderName, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::http::request::ClientAddr;
use crate::http::AppState;
use crate::observability::metrics;
use crate::proxy::response::cors_headers;

pub const X_SESSION_ID: HeaderName = HeaderName::from_static("x-session-id");
const SESSION_COOKIE: &str = "session_id";
const MAX_SESSION_ID_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionDecision {
    Active { id: String, created: bool },
    Blocked { id: String },
}

/// Session as reported by the admin API.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: String,
    pub client: String,
    pub request_count: u64,
    pub idle_secs: u64,
    pub blocked: bool,
}

pub trait SessionStore: Send + Sync {
    /// Resolve the presented id (if any) and count one request against it.
    fn touch(
        &self,
        presented: Option<&str>,
        client: &str,
        config: &SessionConfig,
        now: Instant,
    ) -> SessionDecision;

    fn snapshot(&self, now: Instant) -> Vec<SessionSummary>;

    /// Remove sessions idle past the timeout. Returns how many were removed.
    fn purge(&self, config: &SessionConfig, now: Instant) -> usize;
}

#[derive(Debug)]
struct SessionRecord {
    client: String,
    last_activity: Instant,
    request_count: u64,
    blocked: bool,
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, SessionRecord>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn touch(
        &self,
        presented: Option<&str>,
        client: &str,
        config: &SessionConfig,
        now: Instant,
    ) -> SessionDecision {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(record) = presented.and_then(|id| sessions.get_mut(id).map(|r| (id, r))) {
            let (id, record) = record;
            if record.blocked {
                return SessionDecision::Blocked { id: id.to_string() };
            }
            if now.saturating_duration_since(record.last_activity) <= config.idle_timeout() {
                record.last_activity = now;
                record.request_count += 1;
                if record.request_count > config.max_requests {
                    record.blocked = true;
                    tracing::warn!(session = %id, client = %record.client, "Session exceeded request budget, blocking");
                    return SessionDecision::Blocked { id: id.to_string() };
                }
                return SessionDecision::Active { id: id.to_string(), created: false };
            }
        }

        let id = Uuid::new_v4().to_string();
        sessions.insert(
            id.clone(),
            SessionRecord {
                client: client.to_string(),
                last_activity: now,
                request_count: 1,
                blocked: false,
            },
        );
        SessionDecision::Active { id, created: true }
    }

    fn snapshot(&self, now: Instant) -> Vec<SessionSummary> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let mut summaries: Vec<SessionSummary> = sessions
            .iter()
            .map(|(id, record)| SessionSummary {
                id: id.clone(),
                client: record.client.clone(),
                request_count: record.request_count,
                idle_secs: now.saturating_duration_since(record.last_activity).as_secs(),
                blocked: record.blocked,
            })
            .collect();
        summaries.sort_by_key(|s| s.idle_secs);
        summaries
    }

    fn purge(&self, config: &SessionConfig, now: Instant) -> usize {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        let timeout = config.idle_timeout();
        sessions.retain(|_, record| now.saturating_duration_since(record.last_activity) <= timeout);
        before - sessions.len()
    }
}

/// Session id presented by the client: header first, then cookie.
pub fn presented_session_id(headers: &HeaderMap) -> Option<String> {
    let from_header = headers
        .get(X_SESSION_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let from_cookie = || {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == SESSION_COOKIE)
            .map(|(_, value)| value.trim())
            .filter(|v| !v.is_empty())
    };

    from_header
        .or_else(from_cookie)
        .filter(|id| id.len() <= MAX_SESSION_ID_LEN)
        .map(str::to_owned)
}

/// Middleware applied to the proxy route.
pub async fn session_middleware(
    State(state): State<AppState>,
    ClientAddr(client): ClientAddr,
    request: Request<Body>,
    next: Next,
) -> Response {
    let config = state.config.load_full();
    if !config.sessions.enabled {
        return next.run(request).await;
    }

    let presented = presented_session_id(request.headers());
    let decision = state
        .sessions
        .touch(presented.as_deref(), &client, &config.sessions, Instant::now());

    match decision {
        SessionDecision::Active { id, created } => {
            if created {
                tracing::debug!(session = %id, %client, "New session");
            }
            let mut response = next.run(request).await;
            if let Ok(value) = HeaderValue::from_str(&id) {
                response.headers_mut().insert(X_SESSION_ID, value);
            }
            response
        }
        SessionDecision::Blocked { id } => {
            metrics::record_session_blocked();
            tracing::warn!(session = %id, %client, "Rejected request from blocked session");
            let body = Json(serde_json::json!({
                "success": false,
                "detail": "Session blocked due to suspicious activity",
            }));
            let mut response = (StatusCode::FORBIDDEN, body).into_response();
            cors_headers(response.headers_mut());
            response
        }
    }
}
