//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;

use crate::error::GatewayError;
use crate::registry::StartOutcome;
use crate::service::GatewayService;
use crate::session::{Session, SessionId};

use super::push::push_channel;

/// Error response: `{"error": message}` with a status derived from the
/// failure kind.
#[derive(Debug)]
pub enum ApiError {
    Gateway(GatewayError),
    BadRequest(String),
}

impl From<GatewayError> for ApiError {
    fn from(error: GatewayError) -> Self {
        Self::Gateway(error)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

pub fn status_for(error: &GatewayError) -> StatusCode {
    match error {
        GatewayError::UnknownWorker(_) | GatewayError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        GatewayError::NotRunning(_) => StatusCode::BAD_REQUEST,
        GatewayError::Spawn { .. } | GatewayError::Remote { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        GatewayError::Handshake { .. } | GatewayError::Transport { .. } => StatusCode::BAD_GATEWAY,
        GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        GatewayError::WorkerStopped(_) | GatewayError::WorkerExited(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Gateway(error) => {
                let status = status_for(&error);
                if status.is_server_error() {
                    tracing::warn!(error = %error, %status, "Request failed");
                }
                (status, error.to_string())
            }
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T = Json<Value>> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct CallToolBody {
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteBody {
    pub server: String,
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
}

async fn api_index(State(service): State<Arc<GatewayService>>) -> Json<Value> {
    let servers: Vec<String> = service
        .list_workers()
        .into_iter()
        .map(|worker| worker.name)
        .collect();
    Json(json!({
        "endpoints": {
            "GET /api/servers": "List all available MCP servers",
            "POST /api/servers/{name}/start": "Start a specific MCP server",
            "POST /api/servers/{name}/stop": "Stop a specific MCP server",
            "GET /api/servers/{name}/tools": "List tools available in a server",
            "POST /api/servers/{name}/tools/{tool}": "Execute a tool with arguments",
            "POST /api/sessions": "Create a new session",
            "GET /api/sessions/{id}": "Show a session",
            "POST /api/sessions/{id}/execute": "Execute commands in a session",
            "GET /ws": "WebSocket push channel",
            "GET /health": "Health check",
        },
        "servers": servers,
        "version": service.version(),
    }))
}

async fn list_servers(State(service): State<Arc<GatewayService>>) -> Json<Value> {
    Json(json!({ "servers": service.list_workers() }))
}

async fn start_server(
    State(service): State<Arc<GatewayService>>,
    Path(name): Path<String>,
) -> ApiResult {
    let message = match service.start_worker(&name).await? {
        StartOutcome::Started(_) => format!("Server {name} started successfully"),
        StartOutcome::AlreadyRunning(_) => format!("Server {name} already running"),
    };
    Ok(Json(json!({ "message": message })))
}

async fn stop_server(
    State(service): State<Arc<GatewayService>>,
    Path(name): Path<String>,
) -> ApiResult {
    service.stop_worker(&name).await?;
    Ok(Json(json!({ "message": format!("Server {name} stopped successfully") })))
}

async fn list_tools(
    State(service): State<Arc<GatewayService>>,
    Path(name): Path<String>,
) -> ApiResult {
    Ok(Json(service.list_tools(&name).await?))
}

async fn call_tool(
    State(service): State<Arc<GatewayService>>,
    Path((name, tool)): Path<(String, String)>,
    body: Option<Json<CallToolBody>>,
) -> ApiResult {
    let arguments = body.map(|Json(body)| body.arguments).unwrap_or(Value::Null);
    Ok(Json(service.call_tool(&name, &tool, arguments).await?))
}

async fn create_session(State(service): State<Arc<GatewayService>>) -> Json<Value> {
    let id = service.create_session();
    Json(json!({ "sessionId": id }))
}

async fn get_session(
    State(service): State<Arc<GatewayService>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Session>> {
    let session = service.get_session(id.parse::<SessionId>()?)?;
    Ok(Json(session))
}

async fn execute_in_session(
    State(service): State<Arc<GatewayService>>,
    Path(id): Path<String>,
    body: Result<Json<ExecuteBody>, JsonRejection>,
) -> ApiResult {
    let session = id.parse::<SessionId>()?;
    let Json(body) = body?;
    let result = service
        .execute_in_session(session, &body.server, &body.tool, body.arguments)
        .await?;
    Ok(Json(result))
}

async fn health(State(service): State<Arc<GatewayService>>) -> impl IntoResponse {
    Json(service.health())
}

async fn shutdown(State(service): State<Arc<GatewayService>>) -> impl IntoResponse {
    tracing::info!("Shutdown requested via HTTP");
    service.trigger_shutdown();
    (StatusCode::OK, Json(json!({})))
}

pub fn routes(service: Arc<GatewayService>) -> Router {
    Router::new()
        .route("/api", get(api_index))
        .route("/api/servers", get(list_servers))
        .route("/api/servers/{name}/start", post(start_server))
        .route("/api/servers/{name}/stop", post(stop_server))
        .route("/api/servers/{name}/tools", get(list_tools))
        .route("/api/servers/{name}/tools/{tool}", post(call_tool))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/{id}", get(get_session))
        .route("/api/sessions/{id}/execute", post(execute_in_session))
        .route("/health", get(health))
        .route("/shutdown", post(shutdown))
        .route("/ws", get(push_channel))
        .layer(CorsLayer::permissive())
        .with_state(service)
}
