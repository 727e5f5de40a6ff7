//! DreamForge asset gateway.
//!
//! Streams 3D model assets from a single trusted origin to browsers,
//! recovering once from a mid-stream upstream failure and passing byte-range
//! requests straight through.

pub mod admin;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod proxy;
pub mod security;

pub use config::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use proxy::AssetProxy;
