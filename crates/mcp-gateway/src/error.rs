//! Error taxonomy for gateway operations.

use std::time::Duration;

use serde_json::Value;

use crate::bridge::protocol::RpcError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// No descriptor with this name in the catalog.
    #[error("Server not found: {0}")]
    UnknownWorker(String),

    #[error("failed to spawn worker {name}: {reason}")]
    Spawn { name: String, reason: String },

    /// The `initialize` call failed or timed out. The process has been
    /// terminated; starting again retries from scratch.
    #[error("handshake with worker {name} failed: {reason}")]
    Handshake { name: String, reason: String },

    /// The worker answered with a JSON-RPC error object.
    #[error("{message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// No response within the request window. The worker keeps running.
    #[error("Request timeout after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Server not running: {0}")]
    NotRunning(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The handle was stopped while the call was outstanding.
    #[error("worker {0} was stopped")]
    WorkerStopped(String),

    /// The worker closed its stdout (crashed or exited on its own).
    #[error("worker {0} exited")]
    WorkerExited(String),

    /// Writing to the worker's stdin failed.
    #[error("failed to write to worker {name}: {reason}")]
    Transport { name: String, reason: String },
}

impl From<RpcError> for GatewayError {
    fn from(error: RpcError) -> Self {
        Self::Remote {
            code: error.code,
            message: error.message,
            data: error.data,
        }
    }
}

impl GatewayError {
    /// Errors caused by the caller naming something that does not exist.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownWorker(_) | Self::NotRunning(_) | Self::SessionNotFound(_)
        )
    }
}

pub type Result<T, E = GatewayError> = std::result::Result<T, E>;
