//! Wire protocol types for gateway-worker communication.
//!
//! JSON-RPC 2.0, one message per line over the worker's stdin/stdout.
//!
//! - **Gateway → worker**: `ClientRequest` (initialize, tools/list, tools/call)
//!   wrapped in a `RequestEnvelope`, plus the `notifications/initialized`
//!   notification.
//! - **Worker → gateway**: any line is read as a `RawMessage` and classified
//!   into a `WorkerMessage` before dispatch.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol revision announced during the handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// JSON-RPC error codes used by the reference worker.
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// The `"jsonrpc": "2.0"` marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JsonRpcVersion {
    #[default]
    #[serde(rename = "2.0")]
    V2,
}

/// Name/version pair carried in `clientInfo` and `serverInfo`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootsCapability {
    pub list_changed: bool,
}

/// Capabilities the gateway declares to every worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roots: Option<RootsCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<serde_json::Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ClientCapabilities,
    #[serde(default)]
    pub client_info: Implementation,
}

impl InitializeParams {
    /// The fixed handshake the gateway sends to every worker.
    pub fn gateway() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities {
                roots: Some(RootsCapability { list_changed: true }),
                sampling: Some(serde_json::Map::new()),
            },
            client_info: Implementation {
                name: "mcp-gateway".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

/// Result of a successful `initialize`. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_info: Option<Implementation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListToolsParams {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default = "empty_object")]
    pub arguments: Value,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// A tool as advertised in a `tools/list` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "empty_object")]
    pub input_schema: Value,
}

/// Requests the gateway sends to workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum ClientRequest {
    #[serde(rename = "initialize")]
    Initialize(InitializeParams),

    #[serde(rename = "tools/list")]
    ListTools(ListToolsParams),

    #[serde(rename = "tools/call")]
    CallTool(CallToolParams),
}

impl ClientRequest {
    pub fn list_tools() -> Self {
        Self::ListTools(ListToolsParams::default())
    }

    pub fn call_tool(name: impl Into<String>, arguments: Value) -> Self {
        let arguments = if arguments.is_null() {
            empty_object()
        } else {
            arguments
        };
        Self::CallTool(CallToolParams {
            name: name.into(),
            arguments,
        })
    }

    pub fn method(&self) -> &'static str {
        match self {
            Self::Initialize(_) => METHOD_INITIALIZE,
            Self::ListTools(_) => METHOD_TOOLS_LIST,
            Self::CallTool(_) => METHOD_TOOLS_CALL,
        }
    }

    /// Rebuild a request from the method and params of a decoded line.
    ///
    /// Used on the worker side, where an unknown method must still be
    /// answered with its id rather than failing the whole line.
    pub fn from_parts(method: &str, params: Option<Value>) -> Result<Self, RpcError> {
        let params = params.unwrap_or_else(empty_object);
        let invalid = |e: serde_json::Error| {
            RpcError::new(error_codes::INVALID_PARAMS, format!("invalid params: {e}"))
        };
        match method {
            METHOD_INITIALIZE => serde_json::from_value(params)
                .map(Self::Initialize)
                .map_err(invalid),
            METHOD_TOOLS_LIST => Ok(Self::list_tools()),
            METHOD_TOOLS_CALL => serde_json::from_value(params)
                .map(Self::CallTool)
                .map_err(invalid),
            other => Err(RpcError::new(
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            )),
        }
    }
}

/// An outgoing request line: `{"jsonrpc","id","method","params"}`.
#[derive(Debug, Clone, Serialize)]
pub struct RequestEnvelope {
    pub jsonrpc: JsonRpcVersion,
    pub id: u64,
    #[serde(flatten)]
    pub request: ClientRequest,
}

impl RequestEnvelope {
    pub fn new(id: u64, request: ClientRequest) -> Self {
        Self {
            jsonrpc: JsonRpcVersion::V2,
            id,
            request,
        }
    }
}

/// An outgoing notification line (no id, no response).
#[derive(Debug, Clone, Serialize)]
pub struct NotificationEnvelope {
    pub jsonrpc: JsonRpcVersion,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl NotificationEnvelope {
    pub fn initialized() -> Self {
        Self {
            jsonrpc: JsonRpcVersion::V2,
            method: METHOD_INITIALIZED,
            params: None,
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Read a reply's `error` member. Anything that is not a JSON-RPC error
    /// object becomes an internal error carrying its text.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(_) => serde_json::from_value(value.clone()).unwrap_or_else(|_| Self {
                code: error_codes::INTERNAL_ERROR,
                message: value.to_string(),
                data: Some(value),
            }),
            Value::String(message) => Self::new(error_codes::INTERNAL_ERROR, message),
            other => Self::new(error_codes::INTERNAL_ERROR, other.to_string()),
        }
    }
}

/// Any line on a JSON-RPC stream, before classification.
///
/// Every field is optional so that one shape reads requests, responses and
/// notifications alike.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Kept loose so a non-object error still resolves the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// What a worker sent, as seen by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage {
    /// Reply to one of our requests.
    Response {
        id: u64,
        outcome: Result<Value, RpcError>,
    },
    /// Reply whose id is absent or not one we could have issued.
    Unroutable { id: Option<Value> },
    /// Worker-side event, no reply expected.
    Notification {
        method: String,
        params: Option<Value>,
    },
    /// Worker-initiated request. The gateway does not serve these.
    Request { id: Value, method: String },
}

impl RawMessage {
    pub fn into_worker_message(self) -> WorkerMessage {
        match (self.id, self.method) {
            (Some(id), Some(method)) => WorkerMessage::Request { id, method },
            (None, Some(method)) => WorkerMessage::Notification {
                method,
                params: self.params,
            },
            (Some(id), None) => match id.as_u64() {
                Some(id) => {
                    let outcome = match self.error {
                        Some(error) => Err(RpcError::from_value(error)),
                        None => Ok(self.result.unwrap_or(Value::Null)),
                    };
                    WorkerMessage::Response { id, outcome }
                }
                None => WorkerMessage::Unroutable { id: Some(id) },
            },
            (None, None) => WorkerMessage::Unroutable { id: None },
        }
    }

    /// Classify a line read by a worker.
    pub fn into_client_message(self) -> ClientMessage {
        match (self.id, self.method) {
            (Some(id), Some(method)) => ClientMessage::Request {
                request: ClientRequest::from_parts(&method, self.params),
                id,
                method,
            },
            (None, Some(method)) => ClientMessage::Notification { method },
            (id, None) => ClientMessage::Invalid { id },
        }
    }
}

/// What the gateway sent, as seen by a worker.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Request {
        id: Value,
        method: String,
        request: Result<ClientRequest, RpcError>,
    },
    Notification {
        method: String,
    },
    Invalid {
        id: Option<Value>,
    },
}

/// A reply line written by a worker.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseEnvelope {
    pub jsonrpc: JsonRpcVersion,
    pub id: Value,
    #[serde(flatten)]
    pub body: ResponseBody,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseBody {
    Result(Value),
    Error(RpcError),
}

impl ResponseEnvelope {
    pub fn new(id: Value, outcome: Result<Value, RpcError>) -> Self {
        let body = match outcome {
            Ok(result) => ResponseBody::Result(result),
            Err(error) => ResponseBody::Error(error),
        };
        Self {
            jsonrpc: JsonRpcVersion::V2,
            id,
            body,
        }
    }
}
