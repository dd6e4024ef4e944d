//! Version information for the gateway.

use crate::bridge::protocol::PROTOCOL_VERSION;

/// Gateway version from Cargo.toml
pub const GATEWAY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version information reported by `/health` and `/api`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct VersionInfo {
    /// Gateway release.
    pub gateway: &'static str,
    /// Protocol revision sent in every `initialize`.
    pub protocol: &'static str,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            gateway: GATEWAY_VERSION,
            protocol: PROTOCOL_VERSION,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }
}
