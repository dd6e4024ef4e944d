//! Worker handle: one spawned tool server and its stdio channel.
//!
//! Flow:
//! 1. Spawn the process with stdin/stdout/stderr piped
//! 2. Start a reader task that frames stdout and routes responses by id
//! 3. Send `initialize`, wait for its result, send `notifications/initialized`
//! 4. Serve `tools/list` and `tools/call` until stopped or the worker exits
//! 5. On stop: reject pending calls, SIGTERM, kill after a grace period

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::bridge::codec::JsonLineCodec;
use crate::bridge::protocol::{
    ClientRequest, InitializeParams, InitializeResult, NotificationEnvelope, RawMessage,
    RequestEnvelope, WorkerMessage,
};
use crate::config::WorkerDescriptor;
use crate::error::{GatewayError, Result};
use crate::router::PendingCalls;

/// How long a worker gets to exit after SIGTERM before it is killed.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(2);

type WorkerReader = Box<dyn AsyncRead + Send + Unpin>;
type WorkerWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to spawn process: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("spawn failed: {0}")]
    Other(String),
}

/// Extension point for different worker launch strategies.
pub trait WorkerSpawner: Send + Sync {
    fn spawn(&self, descriptor: &WorkerDescriptor) -> std::result::Result<Child, SpawnError>;
}

/// Runs the descriptor's command directly with its env overlay.
pub struct CommandSpawner;

impl WorkerSpawner for CommandSpawner {
    fn spawn(&self, descriptor: &WorkerDescriptor) -> std::result::Result<Child, SpawnError> {
        let child = Command::new(&descriptor.command)
            .args(&descriptor.args)
            .envs(&descriptor.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        Ok(child)
    }
}

/// Shared between the handle and its reader task.
struct Liveness {
    stopped: AtomicBool,
    exited: AtomicBool,
}

pub struct WorkerHandle {
    name: String,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    request_timeout: Duration,
    pending: Arc<PendingCalls>,
    writer: tokio::sync::Mutex<FramedWrite<WorkerWriter, JsonLineCodec<RawMessage>>>,
    child: StdMutex<Option<Child>>,
    reader_task: StdMutex<Option<JoinHandle<()>>>,
    liveness: Arc<Liveness>,
    server_info: OnceLock<InitializeResult>,
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("name", &self.name)
            .field("pid", &self.pid)
            .field("started_at", &self.started_at)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl WorkerHandle {
    /// Spawn the worker and complete the handshake.
    ///
    /// A failed handshake stops the process before the error is returned.
    pub async fn start(
        descriptor: &WorkerDescriptor,
        spawner: &dyn WorkerSpawner,
        request_timeout: Duration,
    ) -> Result<Arc<Self>> {
        let name = descriptor.name.clone();
        tracing::info!(worker = %name, command = %descriptor.command, "Spawning worker");

        let mut child = spawner.spawn(descriptor).map_err(|e| GatewayError::Spawn {
            name: name.clone(),
            reason: e.to_string(),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| GatewayError::Spawn {
            name: name.clone(),
            reason: "stdin not captured".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| GatewayError::Spawn {
            name: name.clone(),
            reason: "stdout not captured".to_string(),
        })?;
        if let Some(stderr) = child.stderr.take() {
            forward_stderr(name.clone(), stderr);
        }

        let handle = Arc::new(Self::attach(
            name.clone(),
            Box::new(stdout),
            Box::new(stdin),
            Some(child),
            request_timeout,
        ));

        if let Err(e) = handle.handshake().await {
            handle.stop().await;
            return Err(GatewayError::Handshake {
                name,
                reason: e.to_string(),
            });
        }

        tracing::info!(worker = %name, pid = ?handle.pid, "Worker ready");
        Ok(handle)
    }

    /// Wrap an already-connected stdio pair. Starts the reader task but does
    /// not handshake.
    pub fn attach(
        name: String,
        reader: WorkerReader,
        writer: WorkerWriter,
        child: Option<Child>,
        request_timeout: Duration,
    ) -> Self {
        let pending = Arc::new(PendingCalls::new());
        let liveness = Arc::new(Liveness {
            stopped: AtomicBool::new(false),
            exited: AtomicBool::new(false),
        });

        let reader = FramedRead::new(reader, JsonLineCodec::<RawMessage>::new());
        let reader_task = tokio::spawn(read_loop(
            name.clone(),
            reader,
            Arc::clone(&pending),
            Arc::clone(&liveness),
        ));

        Self {
            pid: child.as_ref().and_then(Child::id),
            name,
            started_at: Utc::now(),
            request_timeout,
            pending,
            writer: tokio::sync::Mutex::new(FramedWrite::new(writer, JsonLineCodec::new())),
            child: StdMutex::new(child),
            reader_task: StdMutex::new(Some(reader_task)),
            liveness,
            server_info: OnceLock::new(),
        }
    }

    async fn handshake(&self) -> Result<()> {
        tracing::debug!(worker = %self.name, "Sending initialize");
        let result = self
            .request(ClientRequest::Initialize(InitializeParams::gateway()))
            .await?;

        match serde_json::from_value::<InitializeResult>(result) {
            Ok(info) => {
                tracing::debug!(
                    worker = %self.name,
                    protocol_version = %info.protocol_version,
                    server = ?info.server_info,
                    "Worker initialized"
                );
                let _ = self.server_info.set(info);
            }
            Err(e) => {
                tracing::warn!(worker = %self.name, error = %e, "Unrecognised initialize result");
            }
        }

        self.notify(NotificationEnvelope::initialized()).await
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.server_info.get()
    }

    /// Number of requests awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Neither stopped nor exited.
    pub fn is_alive(&self) -> bool {
        self.ensure_alive().is_ok()
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.liveness.stopped.load(Ordering::SeqCst) {
            return Err(GatewayError::WorkerStopped(self.name.clone()));
        }
        if self.liveness.exited.load(Ordering::SeqCst) {
            return Err(GatewayError::WorkerExited(self.name.clone()));
        }
        Ok(())
    }

    /// Send one request and wait for its response or the timeout.
    ///
    /// The window starts before the write, so a worker that stops draining
    /// its stdin cannot hold the caller past the timeout.
    pub async fn request(&self, request: ClientRequest) -> Result<Value> {
        self.ensure_alive()?;

        let deadline = tokio::time::Instant::now() + self.request_timeout;
        let method = request.method();
        let pending = self.pending.register(method);
        let id = pending.id();

        // The reader flags liveness before draining the table, so a call
        // registered after the drain is caught here.
        if let Err(e) = self.ensure_alive() {
            self.pending.cancel(id);
            return Err(e);
        }

        tracing::trace!(worker = %self.name, id, method, "Sending request");
        let sent = tokio::time::timeout_at(deadline, async {
            let mut writer = self.writer.lock().await;
            writer.send(RequestEnvelope::new(id, request)).await
        })
        .await;
        match sent {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.pending.cancel(id);
                tracing::warn!(worker = %self.name, id, error = %e, "Failed to write request");
                return Err(GatewayError::Transport {
                    name: self.name.clone(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                self.pending.cancel(id);
                tracing::warn!(worker = %self.name, id, method, "Request timed out writing to worker");
                return Err(GatewayError::Timeout(self.request_timeout));
            }
        }

        self.pending
            .wait_until(pending, deadline, self.request_timeout)
            .await
    }

    async fn notify(&self, notification: NotificationEnvelope) -> Result<()> {
        self.ensure_alive()?;
        let sent = tokio::time::timeout(self.request_timeout, async {
            let mut writer = self.writer.lock().await;
            writer.send(notification).await
        })
        .await
        .map_err(|_| GatewayError::Timeout(self.request_timeout))?;
        sent.map_err(|e| GatewayError::Transport {
            name: self.name.clone(),
            reason: e.to_string(),
        })
    }

    pub async fn list_tools(&self) -> Result<Value> {
        self.request(ClientRequest::list_tools()).await
    }

    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value> {
        self.request(ClientRequest::call_tool(tool, arguments)).await
    }

    /// Reject outstanding calls and terminate the process. Idempotent.
    pub async fn stop(&self) {
        if self.liveness.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let reader_task = self
            .reader_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = reader_task {
            task.abort();
        }

        let name = self.name.clone();
        let rejected = self
            .pending
            .fail_all(|| GatewayError::WorkerStopped(name.clone()));
        if rejected > 0 {
            tracing::info!(worker = %self.name, rejected, "Rejected pending calls on stop");
        }

        let child = self
            .child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(child) = child {
            terminate(&self.name, child).await;
        }
        tracing::info!(worker = %self.name, "Worker stopped");
    }
}

async fn read_loop(
    name: String,
    mut reader: FramedRead<WorkerReader, JsonLineCodec<RawMessage>>,
    pending: Arc<PendingCalls>,
    liveness: Arc<Liveness>,
) {
    while let Some(item) = reader.next().await {
        match item {
            Ok(Ok(raw)) => dispatch(&name, &pending, raw),
            Ok(Err(malformed)) => {
                tracing::warn!(
                    worker = %name,
                    reason = %malformed.reason,
                    line = %malformed.preview,
                    "Discarding malformed line from worker"
                );
            }
            Err(e) => {
                tracing::warn!(worker = %name, error = %e, "Worker stdout read failed");
                break;
            }
        }
    }

    liveness.exited.store(true, Ordering::SeqCst);
    if liveness.stopped.load(Ordering::SeqCst) {
        return;
    }
    let rejected = pending.fail_all(|| GatewayError::WorkerExited(name.clone()));
    tracing::warn!(worker = %name, rejected, "Worker closed stdout (exited?)");
}

fn dispatch(name: &str, pending: &PendingCalls, raw: RawMessage) {
    match raw.into_worker_message() {
        WorkerMessage::Response { id, outcome } => {
            let outcome = outcome.map_err(GatewayError::from);
            if !pending.resolve(id, outcome) {
                tracing::warn!(worker = %name, id, "Response for unknown or expired id");
            }
        }
        WorkerMessage::Unroutable { id } => {
            tracing::warn!(worker = %name, ?id, "Dropping message without a usable id");
        }
        WorkerMessage::Notification { method, params } => {
            tracing::debug!(worker = %name, %method, ?params, "Worker notification");
        }
        WorkerMessage::Request { id, method } => {
            tracing::warn!(worker = %name, %id, %method, "Ignoring worker-initiated request");
        }
    }
}

fn forward_stderr(name: String, stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    tracing::info!(target: "mcp_gateway::worker", worker = %name, "{}", line);
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(worker = %name, error = %e, "Worker stderr read failed");
                    break;
                }
            }
        }
    });
}

#[cfg(unix)]
fn request_exit(name: &str, child: &mut Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        tracing::debug!(worker = %name, error = %e, "SIGTERM failed");
    }
}

#[cfg(not(unix))]
fn request_exit(name: &str, child: &mut Child) {
    if let Err(e) = child.start_kill() {
        tracing::debug!(worker = %name, error = %e, "Kill failed");
    }
}

async fn terminate(name: &str, mut child: Child) {
    request_exit(name, &mut child);
    match tokio::time::timeout(STOP_GRACE_PERIOD, child.wait()).await {
        Ok(Ok(status)) => tracing::debug!(worker = %name, %status, "Worker exited"),
        Ok(Err(e)) => tracing::warn!(worker = %name, error = %e, "Failed to wait for worker"),
        Err(_) => {
            tracing::warn!(worker = %name, "Worker ignored SIGTERM, killing");
            if let Err(e) = child.kill().await {
                tracing::warn!(worker = %name, error = %e, "Failed to kill worker");
            }
        }
    }
}
