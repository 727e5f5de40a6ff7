//! Upstream connection leases.
//!
//! # Responsibilities
//! - Count live upstream connections
//! - Tie a connection's lifetime to the body stream that reads it
//! - Release on drop, whichever way the stream ends
//!
//! A client disconnect makes hyper drop the response body, which drops the
//! [`LeasedBody`], which drops the reqwest response and the lease.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;

use crate::observability::metrics;
use super::error::FetchError;

/// Global atomic counter for lease IDs.
/// Relaxed ordering is sufficient since we only need uniqueness.
static LEASE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseId(u64);

impl LeaseId {
    fn next() -> Self {
        Self(LEASE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for LeaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "upstream-{}", self.0)
    }
}

/// Tracks live upstream connections across all requests.
#[derive(Debug, Clone, Default)]
pub struct UpstreamTracker {
    active: Arc<AtomicU64>,
}

impl UpstreamTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly opened connection. Returns a guard that releases it on drop.
    pub fn acquire(&self) -> UpstreamLease {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_upstream_connections(now);
        let id = LeaseId::next();
        tracing::trace!(lease = %id, active = now, "Upstream connection opened");
        UpstreamLease {
            active: Arc::clone(&self.active),
            id,
        }
    }

    /// Number of connections currently held.
    pub fn active(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }
}

/// RAII token for one upstream connection.
#[derive(Debug)]
pub struct UpstreamLease {
    active: Arc<AtomicU64>,
    id: LeaseId,
}

impl UpstreamLease {
    pub fn id(&self) -> LeaseId {
        self.id
    }
}

impl Drop for UpstreamLease {
    fn drop(&mut self) {
        let now = self.active.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_upstream_connections(now);
        tracing::trace!(lease = %self.id, active = now, "Upstream connection released");
    }
}

/// Boxed body stream handed between fetcher, relay and HTTP layer.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, FetchError>> + Send + 'static>>;

/// A body stream that holds its connection lease until it ends or is dropped.
pub struct LeasedBody {
    inner: BodyStream,
    lease: Option<UpstreamLease>,
}

impl LeasedBody {
    pub fn new(inner: BodyStream, lease: UpstreamLease) -> Self {
        Self { inner, lease: Some(lease) }
    }

    pub fn boxed(self) -> BodyStream {
        Box::pin(self)
    }
}

impl Stream for LeasedBody {
    type Item = Result<Bytes, FetchError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.inner.as_mut().poll_next(cx);
        if let Poll::Ready(None) = polled {
            self.lease.take();
        }
        polled
    }
}
