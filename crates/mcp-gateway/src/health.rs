//! Health status types for the gateway.

use serde::{Deserialize, Serialize};

use crate::version::VersionInfo;

/// Health status of the gateway process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    /// Accepting requests
    #[default]
    Healthy,
    /// Shutdown requested, workers being stopped
    ShuttingDown,
}

/// Snapshot of gateway health for transports to query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub status: Health,
    /// Names of workers with a live handle.
    pub active_servers: Vec<String>,
    pub session_count: usize,
    pub version: VersionInfo,
}
