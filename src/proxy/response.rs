//! Outbound response headers for proxied assets.
//!
//! # Responsibilities
//! - Derive a safe inline filename and a content type from the asset URL
//! - Mirror upstream range, validator and content-coding metadata
//! - Attach the CORS headers the model viewer needs
//!
//! # Design Decisions
//! - Range responses copy upstream headers 1:1 (content type included)
//! - Full-file responses never declare Content-Length: a resume may be
//!   needed, and a wrong length is worse than none

use axum::http::header::{
    ACCEPT_RANGES, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE,
    CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_RANGE,
    CONTENT_TYPE, ETAG, LAST_MODIFIED,
};
use axum::http::{HeaderMap, HeaderValue};

use super::fetcher::UpstreamHeaders;

pub const GLB_CONTENT_TYPE: &str = "model/gltf-binary";
pub const GLTF_CONTENT_TYPE: &str = "model/gltf+json";
pub const OCTET_STREAM: &str = "application/octet-stream";
pub const DEFAULT_FILENAME: &str = "model.glb";

const ALLOWED_METHODS: &str = "GET, OPTIONS";
const ALLOWED_HEADERS: &str = "Content-Type, Authorization, Range, X-Request-ID, X-Session-ID";
const EXPOSED_HEADERS: &str = "Content-Length, Content-Range, ETag, Last-Modified, X-Session-ID";
const PREFLIGHT_MAX_AGE: &str = "3600";

/// Name and type of the asset, derived from its URL alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetName {
    pub filename: String,
    pub content_type: &'static str,
}

impl AssetName {
    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or_default();
        let last = path.rsplit('/').next().unwrap_or_default();
        let filename = sanitize_filename(last);

        let content_type = match last.rsplit_once('.') {
            Some((_, ext)) if ext.eq_ignore_ascii_case("glb") => GLB_CONTENT_TYPE,
            Some((_, ext)) if ext.eq_ignore_ascii_case("gltf") => GLTF_CONTENT_TYPE,
            _ => OCTET_STREAM,
        };

        Self { filename, content_type }
    }

    fn disposition(&self) -> HeaderValue {
        // sanitize_filename leaves only visible ASCII without quotes
        HeaderValue::from_str(&format!("inline; filename=\"{}\"", self.filename))
            .unwrap_or_else(|_| HeaderValue::from_static("inline"))
    }
}

/// Keep `[A-Za-z0-9._-]`, replace everything else, fall back to the default.
fn sanitize_filename(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.trim_matches(['.', '_']).is_empty() {
        DEFAULT_FILENAME.to_string()
    } else {
        cleaned
    }
}

/// Headers for a full-file (relayed) response.
pub fn full_file_headers(name: &AssetName, upstream: &UpstreamHeaders, max_age: u64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(name.content_type));
    headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    copy_validators(&mut headers, upstream);
    common_headers(&mut headers, name, max_age);
    headers
}

/// Headers for a range response, mirroring upstream.
pub fn range_headers(name: &AssetName, upstream: &UpstreamHeaders, max_age: u64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let content_type = upstream
        .content_type
        .clone()
        .unwrap_or_else(|| HeaderValue::from_static(name.content_type));
    headers.insert(CONTENT_TYPE, content_type);
    if let Some(len) = upstream.content_length {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
    }
    if let Some(range) = &upstream.content_range {
        headers.insert(CONTENT_RANGE, range.clone());
    }
    let accept = upstream
        .accept_ranges
        .clone()
        .unwrap_or_else(|| HeaderValue::from_static("bytes"));
    headers.insert(ACCEPT_RANGES, accept);
    copy_validators(&mut headers, upstream);
    common_headers(&mut headers, name, max_age);
    headers
}

/// Headers answering a CORS preflight for the proxy route.
pub fn preflight_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    cors_headers(&mut headers);
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOWED_HEADERS));
    headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static(PREFLIGHT_MAX_AGE));
    headers
}

/// CORS headers carried by every proxy response, errors included.
pub fn cors_headers(headers: &mut HeaderMap) {
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOWED_METHODS));
    headers.insert(ACCESS_CONTROL_EXPOSE_HEADERS, HeaderValue::from_static(EXPOSED_HEADERS));
}

/// Validators plus the coding: bytes are relayed verbatim, so an origin
/// that ignored `Accept-Encoding: identity` must still be decodable.
fn copy_validators(headers: &mut HeaderMap, upstream: &UpstreamHeaders) {
    if let Some(encoding) = &upstream.content_encoding {
        headers.insert(CONTENT_ENCODING, encoding.clone());
    }
    if let Some(etag) = &upstream.etag {
        headers.insert(ETAG, etag.clone());
    }
    if let Some(modified) = &upstream.last_modified {
        headers.insert(LAST_MODIFIED, modified.clone());
    }
}

fn common_headers(headers: &mut HeaderMap, name: &AssetName, max_age: u64) {
    headers.insert(CONTENT_DISPOSITION, name.disposition());
    if let Ok(cache) = HeaderValue::from_str(&format!("public, max-age={max_age}")) {
        headers.insert(CACHE_CONTROL, cache);
    }
    cors_headers(headers);
}
