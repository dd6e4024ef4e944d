//! Transport layer for the gateway.
//!
//! Provides the HTTP API and WebSocket push channel via axum. Every handler
//! delegates to `GatewayService`.

pub mod http;

pub use http::{ServerConfig, serve, serve_with_listener};
