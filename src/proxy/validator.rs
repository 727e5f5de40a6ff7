//! Asset URL validation.
//!
//! # Responsibilities
//! - Decide whether a requested URL may be fetched at all
//! - Run before any network I/O, and again on every redirect hop
//!
//! # Design Decisions
//! - Plain prefix match on scheme + host + trailing slash; no parsing, so
//!   no parser differential between the check and the client
//! - `@` and `..` are refused outright even after the origin matched

use thiserror::Error;

/// The single upstream origin assets are relayed from.
pub const TRUSTED_ORIGIN: &str = "https://assets.meshy.ai/";

/// Why a URL was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UrlRejection {
    #[error("invalid domain")]
    UntrustedOrigin,

    #[error("manipulation detected")]
    Manipulation,
}

/// Validator bound to one trusted origin prefix.
#[derive(Debug, Clone)]
pub struct UrlValidator {
    origin: String,
}

impl UrlValidator {
    /// Bind the validator to a different origin prefix.
    ///
    /// The prefix must include the trailing slash, otherwise
    /// `https://host.evil.example/` would match `https://host`.
    pub fn with_origin(origin: impl Into<String>) -> Self {
        Self { origin: origin.into() }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Check a URL. Rules apply in order: origin first, then manipulation.
    pub fn check(&self, url: &str) -> Result<(), UrlRejection> {
        if !url.starts_with(&self.origin) {
            return Err(UrlRejection::UntrustedOrigin);
        }
        if url.contains('@') || url.contains("..") {
            return Err(UrlRejection::Manipulation);
        }
        Ok(())
    }
}

impl Default for UrlValidator {
    fn default() -> Self {
        Self::with_origin(TRUSTED_ORIGIN)
    }
}
