//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, route, status
//! - `gateway_request_duration_seconds` (histogram): time to response head
//! - `gateway_proxy_outcomes_total` (counter): proxy results by path and kind
//! - `gateway_relay_resumes_total` (counter): resume attempts by result
//! - `gateway_relay_aborted_total` (counter): truncated client streams
//! - `gateway_bytes_relayed_total` (counter): body bytes sent on the full path
//! - `gateway_upstream_connections` (gauge): leased upstream connections
//! - `gateway_rate_limited_total` (counter): 429s by reason
//! - `gateway_sessions_blocked_total` (counter): 403s from the session gate
//!
//! Every `record_*` call is a no-op until [`init_metrics`] installs a recorder.

use std::net::SocketAddr;
use std::time::Instant;

use ::metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
///
/// Must run inside the tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, address = %addr, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, route: &str, status: u16, start: Instant) {
    let method = method.to_string();
    let route = route.to_string();
    let status = status.to_string();
    counter!(
        "gateway_requests_total",
        "method" => method.clone(),
        "route" => route.clone(),
        "status" => status.clone()
    )
    .increment(1);
    histogram!(
        "gateway_request_duration_seconds",
        "method" => method,
        "route" => route,
        "status" => status
    )
    .record(start.elapsed().as_secs_f64());
}

/// `path` is `full`, `range` or `error`; `kind` is `streaming` or an error kind.
pub fn record_proxy_outcome(path: &'static str, kind: &'static str) {
    counter!("gateway_proxy_outcomes_total", "path" => path, "kind" => kind).increment(1);
}

pub fn record_resume(result: &'static str) {
    counter!("gateway_relay_resumes_total", "result" => result).increment(1);
}

pub fn record_relay_aborted() {
    counter!("gateway_relay_aborted_total").increment(1);
}

pub fn record_bytes_relayed(bytes: u64) {
    counter!("gateway_bytes_relayed_total").increment(bytes);
}

pub fn set_upstream_connections(active: u64) {
    gauge!("gateway_upstream_connections").set(active as f64);
}

pub fn record_rate_limited(reason: &'static str) {
    counter!("gateway_rate_limited_total", "reason" => reason).increment(1);
}

pub fn record_session_blocked() {
    counter!("gateway_sessions_blocked_total").increment(1);
}
