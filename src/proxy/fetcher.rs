//! Upstream fetcher.
//!
//! # Responsibilities
//! - Open one streaming GET against the trusted origin, optionally ranged
//! - Force identity encoding so relayed byte counts match upstream's
//! - Bound connect and read with the upstream timeout
//! - Hand back a lazy body stream that owns the connection lease
//!
//! # Design Decisions
//! - Object-safe trait with boxed futures so handlers hold `Arc<dyn UpstreamFetcher>`
//! - Non-2xx is an error here; the caller never sees an error body. The one
//!   exception is 416 on a ranged request, whose `Content-Range: bytes */N`
//!   tells the client the real size and is mirrored back
//! - Redirects are followed only while they stay on the trusted origin

use std::error::Error as _;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use reqwest::header::{
    ACCEPT_ENCODING, ACCEPT_RANGES, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_RANGE,
    CONTENT_TYPE, ETAG, LAST_MODIFIED, RANGE,
};
use reqwest::redirect;

use super::error::FetchError;
use super::lease::{BodyStream, LeasedBody, UpstreamTracker};
use super::validator::UrlValidator;

const MAX_REDIRECTS: usize = 5;

/// Upstream response metadata the proxy cares about.
#[derive(Debug, Clone, Default)]
pub struct UpstreamHeaders {
    pub content_type: Option<HeaderValue>,
    pub content_length: Option<u64>,
    pub content_range: Option<HeaderValue>,
    pub accept_ranges: Option<HeaderValue>,
    pub content_encoding: Option<HeaderValue>,
    pub etag: Option<HeaderValue>,
    pub last_modified: Option<HeaderValue>,
}

impl UpstreamHeaders {
    pub fn from_map(headers: &HeaderMap) -> Self {
        let get = |name: HeaderName| headers.get(name).cloned();
        Self {
            content_type: get(CONTENT_TYPE),
            content_length: headers
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok()),
            content_range: get(CONTENT_RANGE),
            accept_ranges: get(ACCEPT_RANGES),
            content_encoding: get(CONTENT_ENCODING),
            etag: get(ETAG),
            last_modified: get(LAST_MODIFIED),
        }
    }

    /// First byte offset of a `Content-Range: bytes START-END/TOTAL` header.
    pub fn range_start(&self) -> Option<u64> {
        let value = self.content_range.as_ref()?.to_str().ok()?;
        let spec = value.trim().strip_prefix("bytes ")?;
        let (start, _) = spec.split_once('-')?;
        start.trim().parse().ok()
    }
}

/// A successful upstream response with its body still unread.
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: UpstreamHeaders,
    pub body: BodyStream,
}

impl UpstreamResponse {
    /// Release the connection without reading the body.
    pub fn close(self) {
        tracing::trace!(status = %self.status, "Closing upstream response unread");
    }
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Opens streaming connections to the asset origin.
pub trait UpstreamFetcher: Send + Sync {
    /// GET `url`, forwarding `range` verbatim as the `Range` header.
    ///
    /// Resolves to a response only for 2xx, or for 416 when `range` is set.
    /// The URL must already have passed [`UrlValidator::check`].
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        range: Option<&'a str>,
    ) -> BoxFuture<'a, Result<UpstreamResponse, FetchError>>;
}

/// Production fetcher backed by reqwest.
pub struct ReqwestFetcher {
    client: reqwest::Client,
    timeout: Duration,
    tracker: UpstreamTracker,
}

impl ReqwestFetcher {
    pub fn new(
        validator: UrlValidator,
        timeout: Duration,
        tracker: UpstreamTracker,
    ) -> Result<Self, FetchError> {
        let policy = redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                attempt.error("too many redirects")
            } else if validator.check(attempt.url().as_str()).is_err() {
                tracing::warn!(target_url = %attempt.url(), "Refusing redirect off the trusted origin");
                attempt.error("redirect left the trusted origin")
            } else {
                attempt.follow()
            }
        });

        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .redirect(policy)
            .no_proxy()
            .user_agent(concat!("dreamforge-gateway/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Transport(describe(&e)))?;

        Ok(Self { client, timeout, tracker })
    }

    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout { secs: self.timeout.as_secs() }
        } else {
            FetchError::Transport(describe(&err))
        }
    }
}

impl UpstreamFetcher for ReqwestFetcher {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        range: Option<&'a str>,
    ) -> BoxFuture<'a, Result<UpstreamResponse, FetchError>> {
        Box::pin(async move {
            let mut request = self.client.get(url).header(ACCEPT_ENCODING, "identity");
            if let Some(range) = range {
                request = request.header(RANGE, range);
            }

            let lease = self.tracker.acquire();
            let response = match tokio::time::timeout(self.timeout, request.send()).await {
                Err(_) => return Err(FetchError::Timeout { secs: self.timeout.as_secs() }),
                Ok(Err(e)) => return Err(self.classify(e)),
                Ok(Ok(response)) => response,
            };

            let status = response.status();
            let unsatisfiable = range.is_some() && status == StatusCode::RANGE_NOT_SATISFIABLE;
            if !status.is_success() && !unsatisfiable {
                return Err(FetchError::UpstreamStatus(status));
            }

            let headers = UpstreamHeaders::from_map(response.headers());
            let secs = self.timeout.as_secs();
            let body = response.bytes_stream().map(move |chunk| {
                chunk.map_err(|e| {
                    if e.is_timeout() {
                        FetchError::Timeout { secs }
                    } else {
                        FetchError::Read(describe(&e))
                    }
                })
            });

            tracing::debug!(
                %status,
                content_length = ?headers.content_length,
                range = ?range,
                lease = %lease.id(),
                "Upstream response opened"
            );

            Ok(UpstreamResponse {
                status,
                headers,
                body: LeasedBody::new(Box::pin(body), lease).boxed(),
            })
        })
    }
}

/// reqwest's Display omits the cause chain, which is where the useful part lives.
fn describe(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
