//! Worker runtime: the child side of the stdio protocol.
//!
//! Reads requests from stdin, one JSON-RPC message per line, and writes
//! responses to stdout. Each request runs in its own task, so a slow tool
//! call does not hold up the next request and replies may be written out of
//! order. Logs must go to stderr; stdout carries only protocol messages.

use std::io;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite, stdin, stdout};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::bridge::codec::JsonLineCodec;
use crate::bridge::protocol::{
    ClientMessage, ClientRequest, Implementation, InitializeParams, InitializeResult,
    PROTOCOL_VERSION, RawMessage, ResponseEnvelope, RpcError, ToolDescriptor, error_codes,
};

type SharedWriter<W> = Arc<Mutex<FramedWrite<W, JsonLineCodec<RawMessage>>>>;

/// Tool implementation served by a worker process.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync + 'static {
    /// Name and version reported in the `initialize` result.
    fn server_info(&self) -> Implementation;

    /// Accept or reject the gateway's handshake.
    async fn initialize(&self, _params: &InitializeParams) -> Result<(), RpcError> {
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, RpcError>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, RpcError>;
}

/// Serve the protocol on the process's stdin/stdout until stdin closes.
pub async fn run_worker<H: ToolHandler>(handler: Arc<H>) -> io::Result<()> {
    serve_worker(handler, stdin(), stdout()).await
}

/// Serve the protocol on an arbitrary reader/writer pair.
pub async fn serve_worker<H, R, W>(handler: Arc<H>, reader: R, writer: W) -> io::Result<()>
where
    H: ToolHandler,
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut reader = FramedRead::new(reader, JsonLineCodec::<RawMessage>::new());
    let writer: SharedWriter<W> = Arc::new(Mutex::new(FramedWrite::new(
        writer,
        JsonLineCodec::new(),
    )));
    let mut in_flight = JoinSet::new();

    tracing::info!("Worker ready");
    while let Some(item) = reader.next().await {
        let raw = match item {
            Ok(Ok(raw)) => raw,
            Ok(Err(malformed)) => {
                tracing::warn!(reason = %malformed.reason, "Malformed request line");
                let error = RpcError::new(error_codes::PARSE_ERROR, "Parse error");
                respond(&writer, ResponseEnvelope::new(Value::Null, Err(error))).await?;
                continue;
            }
            Err(e) => {
                tracing::error!(error = %e, "Request channel error");
                break;
            }
        };

        match raw.into_client_message() {
            ClientMessage::Request {
                id,
                method,
                request,
            } => {
                tracing::debug!(%id, %method, "Request received");
                let handler = Arc::clone(&handler);
                let writer = Arc::clone(&writer);
                in_flight.spawn(async move {
                    let outcome = match request {
                        Ok(request) => dispatch(handler.as_ref(), request).await,
                        Err(error) => Err(error),
                    };
                    if let Err(e) = respond(&writer, ResponseEnvelope::new(id, outcome)).await {
                        tracing::warn!(error = %e, "Failed to write response");
                    }
                });
            }
            ClientMessage::Notification { method } => {
                tracing::debug!(%method, "Notification received");
            }
            ClientMessage::Invalid { id } => {
                let error = RpcError::new(error_codes::INVALID_REQUEST, "Invalid Request");
                respond(
                    &writer,
                    ResponseEnvelope::new(id.unwrap_or(Value::Null), Err(error)),
                )
                .await?;
            }
        }

        while in_flight.try_join_next().is_some() {}
    }

    // Let in-flight calls finish writing before exiting.
    while in_flight.join_next().await.is_some() {}
    tracing::info!("Input closed, worker exiting");
    Ok(())
}

async fn dispatch<H: ToolHandler>(handler: &H, request: ClientRequest) -> Result<Value, RpcError> {
    match request {
        ClientRequest::Initialize(params) => {
            handler.initialize(&params).await?;
            let result = InitializeResult {
                protocol_version: PROTOCOL_VERSION.to_string(),
                capabilities: json!({ "tools": {} }),
                server_info: Some(handler.server_info()),
            };
            serde_json::to_value(result)
                .map_err(|e| RpcError::new(error_codes::INTERNAL_ERROR, e.to_string()))
        }
        ClientRequest::ListTools(_) => Ok(json!({ "tools": handler.list_tools().await? })),
        ClientRequest::CallTool(params) => handler.call_tool(&params.name, params.arguments).await,
    }
}

async fn respond<W>(writer: &SharedWriter<W>, response: ResponseEnvelope) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = writer.lock().await;
    writer.send(response).await
}
