//! Worker registry: name → running handle, at most one per name.
//!
//! Each catalog entry owns a slot with two locks. The async `start_lock`
//! serialises start and stop for that name, so concurrent starts spawn once
//! and the loser observes the winner's handle. The `current` lock only
//! guards the pointer swap, so listing and lookups never wait on a handshake
//! in progress.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;

use crate::config::{WorkerCatalog, WorkerDescriptor};
use crate::error::{GatewayError, Result};
use crate::handle::{CommandSpawner, WorkerHandle, WorkerSpawner};

struct Slot {
    descriptor: WorkerDescriptor,
    start_lock: tokio::sync::Mutex<()>,
    current: RwLock<Option<Arc<WorkerHandle>>>,
}

impl Slot {
    fn current(&self) -> Option<Arc<WorkerHandle>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn live(&self) -> Option<Arc<WorkerHandle>> {
        self.current().filter(|handle| handle.is_alive())
    }

    fn replace(&self, handle: Option<Arc<WorkerHandle>>) -> Option<Arc<WorkerHandle>> {
        let mut current = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, handle)
    }
}

/// One catalog entry as reported to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub name: String,
    pub description: String,
    pub active: bool,
}

/// Result of a start request.
#[derive(Debug, Clone)]
pub enum StartOutcome {
    Started(Arc<WorkerHandle>),
    AlreadyRunning(Arc<WorkerHandle>),
}

impl StartOutcome {
    pub fn handle(&self) -> &Arc<WorkerHandle> {
        match self {
            Self::Started(handle) | Self::AlreadyRunning(handle) => handle,
        }
    }

    pub fn into_handle(self) -> Arc<WorkerHandle> {
        match self {
            Self::Started(handle) | Self::AlreadyRunning(handle) => handle,
        }
    }
}

pub struct WorkerRegistry {
    slots: Vec<Slot>,
    spawner: Arc<dyn WorkerSpawner>,
    request_timeout: Duration,
}

impl WorkerRegistry {
    pub fn new(catalog: WorkerCatalog, request_timeout: Duration) -> Self {
        Self::with_spawner(catalog, request_timeout, Arc::new(CommandSpawner))
    }

    pub fn with_spawner(
        catalog: WorkerCatalog,
        request_timeout: Duration,
        spawner: Arc<dyn WorkerSpawner>,
    ) -> Self {
        let slots = catalog
            .iter()
            .cloned()
            .map(|descriptor| Slot {
                descriptor,
                start_lock: tokio::sync::Mutex::new(()),
                current: RwLock::new(None),
            })
            .collect();
        Self {
            slots,
            spawner,
            request_timeout,
        }
    }

    fn slot(&self, name: &str) -> Result<&Slot> {
        self.slots
            .iter()
            .find(|slot| slot.descriptor.name == name)
            .ok_or_else(|| GatewayError::UnknownWorker(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slot(name).is_ok()
    }

    /// Start the worker unless a live instance already exists.
    pub async fn start(&self, name: &str) -> Result<StartOutcome> {
        let slot = self.slot(name)?;
        if let Some(handle) = slot.live() {
            return Ok(StartOutcome::AlreadyRunning(handle));
        }

        let _guard = slot.start_lock.lock().await;
        // Someone else may have finished starting while we waited.
        if let Some(handle) = slot.live() {
            return Ok(StartOutcome::AlreadyRunning(handle));
        }
        if let Some(dead) = slot.replace(None) {
            tracing::info!(worker = %name, "Replacing exited worker");
            dead.stop().await;
        }

        let handle =
            WorkerHandle::start(&slot.descriptor, self.spawner.as_ref(), self.request_timeout)
                .await?;
        slot.replace(Some(Arc::clone(&handle)));
        Ok(StartOutcome::Started(handle))
    }

    /// Return the live handle, starting the worker if needed.
    pub async fn ensure_started(&self, name: &str) -> Result<Arc<WorkerHandle>> {
        self.start(name).await.map(StartOutcome::into_handle)
    }

    /// The live handle, without starting anything.
    pub fn get(&self, name: &str) -> Result<Arc<WorkerHandle>> {
        self.slot(name)?
            .live()
            .ok_or_else(|| GatewayError::NotRunning(name.to_string()))
    }

    pub async fn stop(&self, name: &str) -> Result<()> {
        let slot = self.slot(name)?;
        let _guard = slot.start_lock.lock().await;
        let handle = slot
            .replace(None)
            .ok_or_else(|| GatewayError::NotRunning(name.to_string()))?;
        handle.stop().await;
        Ok(())
    }

    /// Stop every worker with a handle. Failures are logged, not returned.
    pub async fn stop_all(&self) {
        let stops = self.slots.iter().map(|slot| async move {
            let _guard = slot.start_lock.lock().await;
            if let Some(handle) = slot.replace(None) {
                handle.stop().await;
            }
        });
        futures::future::join_all(stops).await;
        tracing::info!("All workers stopped");
    }

    pub fn list(&self) -> Vec<WorkerStatus> {
        self.slots
            .iter()
            .map(|slot| WorkerStatus {
                name: slot.descriptor.name.clone(),
                description: slot.descriptor.description.clone(),
                active: slot.live().is_some(),
            })
            .collect()
    }

    /// Live handles in catalog order.
    pub fn running(&self) -> Vec<Arc<WorkerHandle>> {
        self.slots.iter().filter_map(Slot::live).collect()
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.live().is_some()).count()
    }
}
