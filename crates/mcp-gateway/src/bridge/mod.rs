//! Stdio bridge between the gateway and its worker processes.
//!
//! # Architecture
//!
//! - **protocol**: JSON-RPC 2.0 envelopes and the MCP methods the gateway speaks
//! - **codec**: newline-delimited JSON framing for AsyncRead/AsyncWrite

pub mod codec;
pub mod protocol;
