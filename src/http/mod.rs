//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, layers, graceful shutdown)
//!     → request.rs (request id, client address, request span)
//!     → security gates (rate limit, session) on /proxy
//!     → proxy.rs (handlers) → crate::proxy
//!     → Send to client
//! ```

pub mod proxy;
pub mod request;
pub mod server;

pub use request::{ClientAddr, RequestId, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
