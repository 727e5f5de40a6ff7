//! Streaming asset proxy subsystem.
//!
//! # Data Flow
//! ```text
//! GET /proxy?url=...
//!     → validator.rs (origin prefix, manipulation; no I/O before this)
//!     → Range header present?
//!         yes → fetcher.rs (ranged GET, 206/200/416) → response.rs (mirror upstream) → client
//!         no  → fetcher.rs (full GET) → size check → relay.rs (one resume)
//!               → response.rs (sniffed type, no length) → client
//! ```
//!
//! # Design Decisions
//! - Nothing is buffered; bytes flow chunk by chunk to hyper
//! - Each request owns its upstream connection through a lease (lease.rs)
//! - No state is shared between requests besides the lease counter

pub mod error;
pub mod fetcher;
pub mod lease;
pub mod relay;
pub mod response;
pub mod validator;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::config::AssetProxyConfig;
use crate::observability::metrics;

pub use error::{FetchError, ProxyError};
pub use fetcher::{ReqwestFetcher, UpstreamFetcher, UpstreamHeaders, UpstreamResponse};
pub use lease::{BodyStream, UpstreamTracker};
pub use validator::{UrlRejection, UrlValidator, TRUSTED_ORIGIN};

use response::{cors_headers, AssetName};

/// One inbound proxy request.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub url: String,
    pub range: Option<String>,
    pub client: String,
    pub request_id: String,
}

/// Status, headers and the lazy body to send back.
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl IntoResponse for ProxyResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from_stream(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "success": false,
            "detail": self.to_string(),
        }));
        let mut response = (self.status(), body).into_response();
        cors_headers(response.headers_mut());
        response
    }
}

/// Composes validator, fetcher and relay.
#[derive(Clone)]
pub struct AssetProxy {
    validator: UrlValidator,
    fetcher: Arc<dyn UpstreamFetcher>,
}

impl AssetProxy {
    pub fn new(validator: UrlValidator, fetcher: Arc<dyn UpstreamFetcher>) -> Self {
        Self { validator, fetcher }
    }

    /// Production wiring: trusted origin, reqwest fetcher.
    pub fn from_config(config: &AssetProxyConfig, tracker: UpstreamTracker) -> Result<Self, FetchError> {
        Self::for_origin(UrlValidator::default(), config, tracker)
    }

    /// Same wiring against another origin prefix (local upstreams in tests).
    pub fn for_origin(
        validator: UrlValidator,
        config: &AssetProxyConfig,
        tracker: UpstreamTracker,
    ) -> Result<Self, FetchError> {
        let fetcher = ReqwestFetcher::new(validator.clone(), config.upstream_timeout(), tracker)?;
        Ok(Self::new(validator, Arc::new(fetcher)))
    }

    pub fn validator(&self) -> &UrlValidator {
        &self.validator
    }

    /// Serve one request. Errors here happen before any byte is sent.
    pub async fn handle(
        &self,
        request: ProxyRequest,
        config: &AssetProxyConfig,
    ) -> Result<ProxyResponse, ProxyError> {
        if let Err(rejection) = self.validator.check(&request.url) {
            tracing::warn!(
                request_id = %request.request_id,
                client = %request.client,
                url = %request.url,
                reason = %rejection,
                "Rejected proxy URL"
            );
            return Err(rejection.into());
        }

        let name = AssetName::from_url(&request.url);
        let result = match request.range.as_deref() {
            Some(range) => self.ranged(&request, range, &name, config).await,
            None => self.full(request.clone(), &name, config).await,
        };

        match &result {
            Ok(response) => {
                let path = if request.range.is_some() { "range" } else { "full" };
                metrics::record_proxy_outcome(path, "streaming");
                tracing::info!(
                    request_id = %request.request_id,
                    client = %request.client,
                    status = %response.status,
                    filename = %name.filename,
                    path,
                    "Streaming asset"
                );
            }
            Err(err) => {
                metrics::record_proxy_outcome("error", err.kind());
                tracing::error!(
                    request_id = %request.request_id,
                    client = %request.client,
                    url = %request.url,
                    error = %err,
                    "Proxy request failed"
                );
            }
        }
        result
    }

    async fn ranged(
        &self,
        request: &ProxyRequest,
        range: &str,
        name: &AssetName,
        config: &AssetProxyConfig,
    ) -> Result<ProxyResponse, ProxyError> {
        let upstream = self.fetcher.fetch(&request.url, Some(range)).await?;
        Ok(ProxyResponse {
            status: upstream.status,
            headers: response::range_headers(name, &upstream.headers, config.cache_max_age_secs),
            body: upstream.body,
        })
    }

    async fn full(
        &self,
        request: ProxyRequest,
        name: &AssetName,
        config: &AssetProxyConfig,
    ) -> Result<ProxyResponse, ProxyError> {
        let upstream = self.fetcher.fetch(&request.url, None).await?;

        if let Some(declared) = upstream.headers.content_length {
            if declared < config.min_file_size {
                upstream.close();
                return Err(ProxyError::CorruptOrEmpty {
                    declared,
                    minimum: config.min_file_size,
                });
            }
        }

        let headers =
            response::full_file_headers(name, &upstream.headers, config.cache_max_age_secs);
        let body = relay::relay(
            Arc::clone(&self.fetcher),
            request.url,
            request.request_id,
            upstream,
        );

        Ok(ProxyResponse {
            status: StatusCode::OK,
            headers,
            body,
        })
    }
}
