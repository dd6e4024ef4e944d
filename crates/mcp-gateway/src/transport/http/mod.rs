//! HTTP and WebSocket transport via axum.

mod push;
mod routes;
mod server;

pub use push::{PushOutcome, PushReply, PushRequest, handle_request, parse_request};
pub use routes::{ApiError, routes, status_for};
pub use server::{ServerConfig, serve, serve_with_listener};
