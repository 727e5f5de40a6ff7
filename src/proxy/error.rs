//! Proxy error taxonomy.

use axum::http::StatusCode;
use thiserror::Error;

use super::validator::UrlRejection;

/// Failures talking to the upstream origin.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connect or read exceeded the upstream timeout.
    #[error("upstream timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Upstream answered with a non-2xx status.
    #[error("upstream returned HTTP {0}")]
    UpstreamStatus(StatusCode),

    /// Connection could not be established or the request failed.
    #[error("upstream transport error: {0}")]
    Transport(String),

    /// The body stream broke after the response started.
    #[error("upstream read failed: {0}")]
    Read(String),

    /// A resume request came back without the expected partial content.
    #[error("resume rejected: {0}")]
    ResumeRejected(String),
}

impl FetchError {
    /// Status reported to the client when this happens before streaming.
    pub fn status(&self) -> StatusCode {
        match self {
            FetchError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            FetchError::UpstreamStatus(status) => *status,
            FetchError::Transport(_) | FetchError::Read(_) | FetchError::ResumeRejected(_) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }
}

/// Everything that stops a proxy request before the first byte is sent.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Invalid URL: {0}")]
    Rejected(#[from] UrlRejection),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("File too small ({declared} bytes), possibly corrupt or empty")]
    CorruptOrEmpty { declared: u64, minimum: u64 },
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Rejected(_) | ProxyError::CorruptOrEmpty { .. } => StatusCode::BAD_REQUEST,
            ProxyError::Fetch(e) => e.status(),
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::Rejected(UrlRejection::UntrustedOrigin) => "untrusted_origin",
            ProxyError::Rejected(UrlRejection::Manipulation) => "manipulation",
            ProxyError::CorruptOrEmpty { .. } => "too_small",
            ProxyError::Fetch(FetchError::Timeout { .. }) => "timeout",
            ProxyError::Fetch(FetchError::UpstreamStatus(_)) => "upstream_status",
            ProxyError::Fetch(_) => "transport",
        }
    }
}
