//! Resilient full-file relay.
//!
//! # States
//! ```text
//! Streaming(bytes_sent, attempts) --chunk--> Streaming(bytes_sent + n, attempts)
//! Streaming --upstream EOF-----------------> Done
//! Streaming --read error, budget left, bytes_sent > 0
//!           --reopen `Range: bytes=<bytes_sent>-`--> Streaming(bytes_sent, attempts + 1)
//! Streaming --read error otherwise---------> Aborted (one error item, then end)
//! ```
//!
//! # Design Decisions
//! - One resume, for mid-stream read errors only. A failing resume fetch
//!   (connect, timeout, non-2xx) aborts instead of retrying again.
//! - The resumed response must be 206 and start at `bytes_sent`, or bytes
//!   would be duplicated or skipped.
//! - Headers are committed before the first chunk, so an abort can only
//!   truncate the body.

use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;
use futures_util::{stream, StreamExt};

use super::error::FetchError;
use super::fetcher::{UpstreamFetcher, UpstreamResponse};
use super::lease::BodyStream;
use crate::observability::metrics;

/// Extra upstream connections allowed per client stream.
pub const MAX_RESUME_ATTEMPTS: u32 = 1;

/// Progress of one logical client stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySession {
    pub bytes_delivered: u64,
    pub attempts: u32,
    pub max_attempts: u32,
}

impl RelaySession {
    pub fn new() -> Self {
        Self {
            bytes_delivered: 0,
            attempts: 0,
            max_attempts: MAX_RESUME_ATTEMPTS,
        }
    }

    pub fn record(&mut self, len: usize) {
        self.bytes_delivered += len as u64;
    }

    /// A resume needs both budget and an offset to resume from.
    pub fn can_resume(&self) -> bool {
        self.attempts < self.max_attempts && self.bytes_delivered > 0
    }

    /// `Range` header value for the first undelivered byte.
    pub fn range_header(&self) -> String {
        format!("bytes={}-", self.bytes_delivered)
    }
}

impl Default for RelaySession {
    fn default() -> Self {
        Self::new()
    }
}

struct Relay {
    fetcher: Arc<dyn UpstreamFetcher>,
    url: String,
    request_id: String,
    started: Instant,
}

enum RelayState {
    Streaming { body: BodyStream, session: RelaySession },
    Finished,
}

/// Turn an opened full-file response into a self-healing byte stream.
pub fn relay(
    fetcher: Arc<dyn UpstreamFetcher>,
    url: String,
    request_id: String,
    first: UpstreamResponse,
) -> BodyStream {
    let relay = Relay {
        fetcher,
        url,
        request_id,
        started: Instant::now(),
    };
    let state = RelayState::Streaming {
        body: first.body,
        session: RelaySession::new(),
    };

    Box::pin(stream::unfold((relay, state), |(relay, state)| async move {
        let RelayState::Streaming { mut body, mut session } = state else {
            return None;
        };

        loop {
            match body.next().await {
                Some(Ok(chunk)) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    session.record(chunk.len());
                    metrics::record_bytes_relayed(chunk.len() as u64);
                    return Some((Ok(chunk), (relay, RelayState::Streaming { body, session })));
                }
                None => {
                    relay.finish(&session);
                    return None;
                }
                Some(Err(err)) => {
                    // Release the broken connection before opening the next one.
                    drop(body);

                    if !session.can_resume() {
                        relay.abort(&session, &err);
                        return Some((Err(err), (relay, RelayState::Finished)));
                    }

                    tracing::warn!(
                        request_id = %relay.request_id,
                        bytes_delivered = session.bytes_delivered,
                        error = %err,
                        "Upstream stream broke, resuming"
                    );

                    match relay.reopen(&session).await {
                        Ok(next) => {
                            session.attempts += 1;
                            metrics::record_resume("resumed");
                            body = next;
                        }
                        Err(resume_err) => {
                            metrics::record_resume("failed");
                            relay.abort(&session, &resume_err);
                            return Some((Err(resume_err), (relay, RelayState::Finished)));
                        }
                    }
                }
            }
        }
    }))
}

impl Relay {
    async fn reopen(&self, session: &RelaySession) -> Result<BodyStream, FetchError> {
        let range = session.range_header();
        let resumed = self.fetcher.fetch(&self.url, Some(&range)).await?;

        if resumed.status != StatusCode::PARTIAL_CONTENT {
            let status = resumed.status;
            resumed.close();
            return Err(FetchError::ResumeRejected(format!(
                "expected 206 for {range}, got {status}"
            )));
        }

        if let Some(start) = resumed.headers.range_start() {
            if start != session.bytes_delivered {
                resumed.close();
                return Err(FetchError::ResumeRejected(format!(
                    "asked for {range}, upstream resumed at byte {start}"
                )));
            }
        }

        Ok(resumed.body)
    }

    fn finish(&self, session: &RelaySession) {
        tracing::info!(
            request_id = %self.request_id,
            bytes = session.bytes_delivered,
            resumes = session.attempts,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Asset relay complete"
        );
    }

    fn abort(&self, session: &RelaySession, err: &FetchError) {
        metrics::record_relay_aborted();
        tracing::error!(
            request_id = %self.request_id,
            url = %self.url,
            bytes = session.bytes_delivered,
            resumes = session.attempts,
            error = %err,
            "Asset relay aborted, client body truncated"
        );
    }
}
