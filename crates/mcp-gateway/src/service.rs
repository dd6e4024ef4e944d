//! GatewayService: transport-agnostic worker and session management.
//!
//! This service owns:
//! - The worker registry (start/stop, at most one process per name)
//! - The session table
//! - Shutdown coordination (bidirectional)
//!
//! Transports (HTTP, WebSocket) delegate every operation to this service and
//! only translate its `GatewayError`s into their own error shapes.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

use crate::config::{GatewayConfig, WorkerCatalog};
use crate::error::{GatewayError, Result};
use crate::handle::{CommandSpawner, WorkerSpawner};
use crate::health::{Health, HealthSnapshot};
use crate::registry::{StartOutcome, WorkerRegistry, WorkerStatus};
use crate::session::{Session, SessionId, SessionTable};
use crate::version::VersionInfo;

/// One worker's entry in a broadcast tool listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ToolListing {
    Tools { tools: Value },
    Error { error: String },
}

pub struct GatewayService {
    registry: WorkerRegistry,
    sessions: SessionTable,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    version: VersionInfo,
}

impl GatewayService {
    pub fn new(catalog: WorkerCatalog, config: GatewayConfig) -> Self {
        Self::with_spawner(catalog, config, Arc::new(CommandSpawner))
    }

    pub fn with_spawner(
        catalog: WorkerCatalog,
        config: GatewayConfig,
        spawner: Arc<dyn WorkerSpawner>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            registry: WorkerRegistry::with_spawner(catalog, config.request_timeout, spawner),
            sessions: SessionTable::new(),
            shutdown_tx,
            shutdown_rx,
            version: VersionInfo::new(),
        }
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn version(&self) -> &VersionInfo {
        &self.version
    }

    pub fn list_workers(&self) -> Vec<WorkerStatus> {
        self.registry.list()
    }

    pub async fn start_worker(&self, name: &str) -> Result<StartOutcome> {
        self.registry.start(name).await
    }

    pub async fn stop_worker(&self, name: &str) -> Result<()> {
        self.registry.stop(name).await
    }

    /// `tools/list` on a worker that is already running.
    pub async fn list_tools(&self, name: &str) -> Result<Value> {
        self.registry.get(name)?.list_tools().await
    }

    /// `tools/call` on a worker that is already running.
    pub async fn call_tool(&self, name: &str, tool: &str, arguments: Value) -> Result<Value> {
        self.registry.get(name)?.call_tool(tool, arguments).await
    }

    /// `tools/call`, starting the worker first if needed.
    pub async fn call_tool_starting(
        &self,
        name: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<Value> {
        self.registry
            .ensure_started(name)
            .await?
            .call_tool(tool, arguments)
            .await
    }

    pub fn create_session(&self) -> SessionId {
        self.sessions.create()
    }

    pub fn get_session(&self, id: SessionId) -> Result<Session> {
        self.sessions.get(id)
    }

    pub fn remove_session(&self, id: SessionId) -> bool {
        self.sessions.remove(id)
    }

    /// Run a tool on behalf of a session, starting the worker if needed.
    pub async fn execute_in_session(
        &self,
        session: SessionId,
        worker: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<Value> {
        if !self.sessions.exists(session) {
            return Err(GatewayError::SessionNotFound(session.to_string()));
        }
        let handle = self.registry.ensure_started(worker).await?;
        // The session may have been dropped while the worker started; the
        // call itself still goes through.
        if let Err(e) = self.sessions.record_worker(session, worker) {
            tracing::debug!(%session, error = %e, "Session gone before call");
        }
        handle.call_tool(tool, arguments).await
    }

    /// Ask every running worker for its tools, concurrently.
    ///
    /// A failing worker contributes an error entry; the others still report.
    pub async fn broadcast_list_tools(&self) -> BTreeMap<String, ToolListing> {
        let queries = self.registry.running().into_iter().map(|handle| async move {
            let listing = match handle.list_tools().await {
                Ok(mut result) => ToolListing::Tools {
                    tools: result
                        .get_mut("tools")
                        .map(Value::take)
                        .unwrap_or(Value::Array(Vec::new())),
                },
                Err(e) => {
                    tracing::warn!(worker = %handle.name(), error = %e, "Tool listing failed");
                    ToolListing::Error {
                        error: e.to_string(),
                    }
                }
            };
            (handle.name().to_string(), listing)
        });
        futures::future::join_all(queries)
            .await
            .into_iter()
            .collect()
    }

    pub fn health(&self) -> HealthSnapshot {
        let status = if *self.shutdown_rx.borrow() {
            Health::ShuttingDown
        } else {
            Health::Healthy
        };
        HealthSnapshot {
            status,
            active_servers: self
                .registry
                .running()
                .iter()
                .map(|handle| handle.name().to_string())
                .collect(),
            session_count: self.sessions.len(),
            version: self.version.clone(),
        }
    }

    /// Stop every running worker.
    pub async fn shutdown(&self) {
        tracing::info!("Stopping all workers");
        self.registry.stop_all().await;
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }
}
