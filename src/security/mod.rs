//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! GET /proxy:
//!     → rate_limit.rs (per-IP sliding window, 429 + Retry-After)
//!     → session.rs (X-Session-ID tracking, 403 when blocked)
//!     → proxy handler
//!
//! Every response:
//!     → headers.rs (nosniff, frame denial, HSTS)
//!
//! Background:
//!     → sweeper.rs (purge idle windows and sessions)
//! ```
//!
//! # Design Decisions
//! - Stores sit behind traits; handlers hold `Arc<dyn ...>`
//! - OPTIONS preflights skip both gates

pub mod headers;
pub mod rate_limit;
pub mod session;
pub mod sweeper;

pub use rate_limit::{RateDecision, RateLimitStore, SlidingWindowLimiter};
pub use session::{InMemorySessionStore, SessionDecision, SessionStore};
pub use sweeper::StoreSweeper;
