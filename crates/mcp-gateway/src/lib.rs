//! mcp-gateway: supervises stdio JSON-RPC tool workers and routes requests
//! from HTTP and WebSocket clients to them.

mod health;
mod version;

pub mod bridge;
pub mod config;
pub mod error;
pub mod handle;
pub mod logging;
pub mod registry;
pub mod router;
pub mod service;
pub mod session;
pub mod transport;
pub mod worker;

pub use config::{CatalogError, GatewayConfig, WorkerCatalog, WorkerDescriptor};
pub use error::GatewayError;
pub use handle::{CommandSpawner, SpawnError, WorkerHandle, WorkerSpawner};
pub use health::{Health, HealthSnapshot};
pub use registry::{StartOutcome, WorkerRegistry, WorkerStatus};
pub use service::{GatewayService, ToolListing};
pub use session::{Session, SessionId};
pub use transport::{ServerConfig, serve, serve_with_listener};
pub use version::{GATEWAY_VERSION, VersionInfo};
pub use worker::{ToolHandler, run_worker, serve_worker};
