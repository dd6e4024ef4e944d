//! Request/response correlation for one worker.
//!
//! Each outgoing request gets the next id from a per-handle counter and a
//! oneshot slot in the pending table. A call is retired exactly once: either
//! the reader task resolves it with a matching response, or the waiter's
//! timer expires and removes it. Both paths go through `retire`, which is a
//! check-then-delete under the table lock, so whichever side removes the
//! entry first wins and the other becomes a no-op.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::GatewayError;

pub type CallResult = Result<Value, GatewayError>;

/// Default window for a worker to answer a request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

struct PendingCall {
    method: &'static str,
    created_at: Instant,
    completion: oneshot::Sender<CallResult>,
}

/// Receiving side of a registered call.
pub struct PendingResponse {
    id: u64,
    rx: oneshot::Receiver<CallResult>,
}

impl PendingResponse {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Pending-call table plus id allocator.
pub struct PendingCalls {
    next_id: AtomicU64,
    calls: StdMutex<HashMap<u64, PendingCall>>,
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingCalls {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            calls: StdMutex::new(HashMap::new()),
        }
    }

    // A panic while holding the lock cannot leave the map half-updated
    // (every operation is a single insert/remove), so recover the guard.
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, PendingCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate an id and register a call for it.
    ///
    /// Must happen before the request is written so a fast reply always finds
    /// its entry.
    pub fn register(&self, method: &'static str) -> PendingResponse {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (completion, rx) = oneshot::channel();
        self.lock().insert(
            id,
            PendingCall {
                method,
                created_at: Instant::now(),
                completion,
            },
        );
        PendingResponse { id, rx }
    }

    fn retire(&self, id: u64) -> Option<PendingCall> {
        self.lock().remove(&id)
    }

    /// Deliver an outcome. Returns false if the id is unknown or already
    /// retired (late reply after timeout, duplicate reply, stray id).
    pub fn resolve(&self, id: u64, outcome: CallResult) -> bool {
        let Some(call) = self.retire(id) else {
            return false;
        };
        tracing::debug!(
            id,
            method = call.method,
            elapsed_ms = call.created_at.elapsed().as_millis() as u64,
            ok = outcome.is_ok(),
            "Call resolved"
        );
        // The waiter may have been dropped (caller went away); nothing to do.
        let _ = call.completion.send(outcome);
        true
    }

    /// Drop a registration whose request never made it onto the wire.
    pub fn cancel(&self, id: u64) -> bool {
        self.retire(id).is_some()
    }

    /// Reject every outstanding call. Returns how many were rejected.
    pub fn fail_all(&self, error: impl Fn() -> GatewayError) -> usize {
        let drained: Vec<PendingCall> = self.lock().drain().map(|(_, call)| call).collect();
        let count = drained.len();
        for call in drained {
            let _ = call.completion.send(Err(error()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for a registered call to be retired, bounded by `timeout`.
    ///
    /// Dropping the future (caller disconnected) retires the call as well.
    pub async fn wait(&self, pending: PendingResponse, timeout: Duration) -> CallResult {
        self.wait_until(pending, tokio::time::Instant::now() + timeout, timeout)
            .await
    }

    /// Like `wait`, but against a deadline fixed earlier (before the request
    /// was written). `timeout` is the full window, reported on expiry.
    pub async fn wait_until(
        &self,
        pending: PendingResponse,
        deadline: tokio::time::Instant,
        timeout: Duration,
    ) -> CallResult {
        let PendingResponse { id, mut rx } = pending;
        let _abandon = AbandonOnDrop { calls: self, id };
        match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            // Sender dropped without a value: only `cancel` does that, and it
            // is never used on a call somebody is waiting for.
            Ok(Err(_)) => Err(GatewayError::Timeout(timeout)),
            Err(_) => {
                if let Some(call) = self.retire(id) {
                    tracing::warn!(
                        id,
                        method = call.method,
                        timeout_ms = timeout.as_millis() as u64,
                        "Request timed out"
                    );
                    return Err(GatewayError::Timeout(timeout));
                }
                // The reply retired the entry between the timer firing and
                // our retire attempt, so its outcome is already in the channel.
                rx.try_recv()
                    .unwrap_or(Err(GatewayError::Timeout(timeout)))
            }
        }
    }
}

struct AbandonOnDrop<'a> {
    calls: &'a PendingCalls,
    id: u64,
}

impl Drop for AbandonOnDrop<'_> {
    fn drop(&mut self) {
        self.calls.cancel(self.id);
    }
}
