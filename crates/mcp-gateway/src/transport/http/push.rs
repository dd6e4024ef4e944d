//! WebSocket push channel.
//!
//! Each connection gets its own session for as long as it is open. Text
//! frames carry one JSON request each; `execute` requests run concurrently
//! and their replies are written back as they complete, so replies may
//! arrive in a different order than the requests.

use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::service::GatewayService;
use crate::session::SessionId;

/// Replies queued per connection before request tasks wait for the writer.
const REPLY_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PushRequest {
    Execute {
        #[serde(default)]
        id: Value,
        server: String,
        tool: String,
        #[serde(default)]
        arguments: Value,
    },
    ListTools {
        #[serde(default)]
        id: Value,
    },
}

impl PushRequest {
    pub fn id(&self) -> &Value {
        match self {
            Self::Execute { id, .. } | Self::ListTools { id } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PushOutcome {
    Result(Value),
    Error(String),
}

/// `{"id": ..., "result": ...}` or `{"id": ..., "error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushReply {
    pub id: Value,
    #[serde(flatten)]
    pub outcome: PushOutcome,
}

impl PushReply {
    fn result(id: Value, result: Value) -> Self {
        Self {
            id,
            outcome: PushOutcome::Result(result),
        }
    }

    fn error(id: Value, error: impl ToString) -> Self {
        Self {
            id,
            outcome: PushOutcome::Error(error.to_string()),
        }
    }
}

/// Decode one frame. On failure the reply echoes the request's `id` when it
/// can be recovered, `null` otherwise.
pub fn parse_request(text: &str) -> Result<PushRequest, PushReply> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| PushReply::error(Value::Null, e))?;
    let id = value.get("id").cloned().unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|e| PushReply::error(id, e))
}

/// Run one request on behalf of a connection's session.
pub async fn handle_request(
    service: &GatewayService,
    session: SessionId,
    request: PushRequest,
) -> PushReply {
    match request {
        PushRequest::Execute {
            id,
            server,
            tool,
            arguments,
        } => match service
            .execute_in_session(session, &server, &tool, arguments)
            .await
        {
            Ok(result) => PushReply::result(id, result),
            Err(e) => PushReply::error(id, e),
        },
        PushRequest::ListTools { id } => {
            let listings = service.broadcast_list_tools().await;
            match serde_json::to_value(listings) {
                Ok(result) => PushReply::result(id, result),
                Err(e) => PushReply::error(id, e),
            }
        }
    }
}

pub async fn push_channel(
    ws: WebSocketUpgrade,
    State(service): State<Arc<GatewayService>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_connection(socket, service))
}

async fn serve_connection(socket: WebSocket, service: Arc<GatewayService>) {
    let session = service.create_session();
    tracing::info!(%session, "Push client connected");

    let (mut sink, mut stream) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<PushReply>(REPLY_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(reply) = reply_rx.recv().await {
            let text = match serde_json::to_string(&reply) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to encode push reply");
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                tracing::debug!(error = %e, "Push client went away");
                break;
            }
        }
    });

    let mut in_flight = JoinSet::new();
    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(e) => {
                    let _ = reply_tx.send(PushReply::error(Value::Null, e)).await;
                    continue;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(%session, error = %e, "Push connection error");
                break;
            }
        };

        match parse_request(&text) {
            Ok(request) => {
                tracing::debug!(%session, id = %request.id(), "Push request");
                let service = Arc::clone(&service);
                let reply_tx = reply_tx.clone();
                in_flight.spawn(async move {
                    let reply = handle_request(&service, session, request).await;
                    let _ = reply_tx.send(reply).await;
                });
            }
            Err(reply) => {
                tracing::debug!(%session, "Unparseable push message");
                if reply_tx.send(reply).await.is_err() {
                    break;
                }
            }
        }

        // Reap finished tasks so the set does not grow without bound.
        while in_flight.try_join_next().is_some() {}
    }

    in_flight.shutdown().await;
    drop(reply_tx);
    let _ = writer.await;
    service.remove_session(session);
    tracing::info!(%session, "Push client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::config::{GatewayConfig, WorkerCatalog, WorkerDescriptor};
    use crate::handle::{SpawnError, WorkerSpawner};

    struct NoSpawn;

    impl WorkerSpawner for NoSpawn {
        fn spawn(
            &self,
            _descriptor: &WorkerDescriptor,
        ) -> Result<tokio::process::Child, SpawnError> {
            Err(SpawnError::Other("disabled in tests".to_string()))
        }
    }

    fn service() -> GatewayService {
        let catalog = WorkerCatalog::new(vec![WorkerDescriptor::new("echo", "echo-bin")]).unwrap();
        GatewayService::with_spawner(catalog, GatewayConfig::default(), Arc::new(NoSpawn))
    }

    #[test]
    fn parses_execute_and_list_tools() {
        let request = parse_request(
            r#"{"type":"execute","id":"a1","server":"echo","tool":"add","arguments":{"a":2,"b":3}}"#,
        )
        .unwrap();
        assert_eq!(
            request,
            PushRequest::Execute {
                id: json!("a1"),
                server: "echo".into(),
                tool: "add".into(),
                arguments: json!({"a": 2, "b": 3}),
            }
        );

        let request = parse_request(r#"{"type":"list-tools","id":7}"#).unwrap();
        assert_eq!(request, PushRequest::ListTools { id: json!(7) });
    }

    #[test]
    fn invalid_json_replies_with_null_id() {
        let reply = parse_request("{not json").unwrap_err();
        assert_eq!(reply.id, Value::Null);
        assert!(matches!(reply.outcome, PushOutcome::Error(_)));
    }

    #[test]
    fn unknown_type_keeps_request_id() {
        let reply = parse_request(r#"{"type":"subscribe","id":42}"#).unwrap_err();
        assert_eq!(reply.id, json!(42));
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["id"], 42);
        assert!(value["error"].as_str().unwrap().contains("subscribe"));
    }

    #[test]
    fn reply_serializes_flat() {
        let reply = PushReply::result(json!(1), json!({"content": []}));
        assert_eq!(
            serde_json::to_value(reply).unwrap(),
            json!({"id": 1, "result": {"content": []}})
        );
    }

    #[tokio::test]
    async fn execute_failure_becomes_error_reply() {
        let service = service();
        let session = service.create_session();
        let reply = handle_request(
            &service,
            session,
            PushRequest::Execute {
                id: json!("x"),
                server: "missing".into(),
                tool: "t".into(),
                arguments: Value::Null,
            },
        )
        .await;
        assert_eq!(
            reply,
            PushReply::error(json!("x"), "Server not found: missing")
        );
    }

    #[tokio::test]
    async fn list_tools_with_no_workers_is_empty_object() {
        let service = service();
        let session = service.create_session();
        let reply =
            handle_request(&service, session, PushRequest::ListTools { id: json!(3) }).await;
        assert_eq!(reply, PushReply::result(json!(3), json!({})));
    }
}
