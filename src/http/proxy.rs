//! Route handlers.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use axum::{
    extract::{Query, State},
    http::{header::RANGE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use crate::http::request::{ClientAddr, RequestId};
use crate::http::AppState;
use crate::observability::metrics;
use crate::proxy::response::{cors_headers, preflight_headers};
use crate::proxy::ProxyRequest;

#[derive(Debug, Deserialize)]
pub struct ProxyQuery {
    pub url: Option<String>,
}

/// `GET /proxy?url=...`
pub async fn proxy_handler(
    State(state): State<AppState>,
    ClientAddr(client): ClientAddr,
    RequestId(request_id): RequestId,
    Query(query): Query<ProxyQuery>,
    headers: HeaderMap,
) -> Response {
    let start = Instant::now();

    let Some(url) = query.url.filter(|u| !u.is_empty()) else {
        metrics::record_request("GET", "/proxy", 400, start);
        return bad_request("Missing required query parameter: url");
    };

    let range = match headers.get(RANGE).map(|v| v.to_str()) {
        None => None,
        Some(Ok(value)) => Some(value.to_owned()),
        Some(Err(_)) => {
            tracing::warn!(%request_id, %client, "Unreadable Range header");
            metrics::record_request("GET", "/proxy", 400, start);
            return bad_request("Invalid Range header");
        }
    };

    tracing::debug!(%request_id, %client, %url, range = ?range, "Proxy request");

    let config = state.config.load_full();
    let request = ProxyRequest { url, range, client, request_id };
    let response = match state.proxy.handle(request, &config.proxy).await {
        Ok(response) => response.into_response(),
        Err(err) => err.into_response(),
    };

    metrics::record_request("GET", "/proxy", response.status().as_u16(), start);
    response
}

/// `OPTIONS /proxy`: CORS preflight, answered without looking at the query.
pub async fn proxy_preflight() -> impl IntoResponse {
    (StatusCode::NO_CONTENT, preflight_headers())
}

/// `GET /`
pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "DreamForge API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": timestamp,
    }))
}

fn bad_request(detail: &str) -> Response {
    let body = Json(serde_json::json!({
        "success": false,
        "detail": detail,
    }));
    let mut response = (StatusCode::BAD_REQUEST, body).into_response();
    cors_headers(response.headers_mut());
    response
}
