//! Reference worker: serves a handful of tools over stdio.
//!
//! Used by the integration tests and handy for poking at a gateway by hand.
//! Behaviour can be bent through the environment:
//!
//! - `ECHO_WORKER_FAIL_LIST`: comma-separated methods or tool names that
//!   answer with an error (`tools/list`, `add`, ...)
//! - `ECHO_WORKER_REJECT_INIT`: any non-empty value rejects `initialize`
//! - `ECHO_WORKER_INIT_DELAY_MS`: delay before answering `initialize`

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use mcp_gateway::bridge::protocol::{
    Implementation, InitializeParams, METHOD_INITIALIZE, METHOD_TOOLS_LIST, RpcError,
    ToolDescriptor, error_codes,
};
use mcp_gateway::logging::init_tracing;
use mcp_gateway::{ToolHandler, run_worker};

const FAIL_ENV: &str = "ECHO_WORKER_FAIL_LIST";
const REJECT_INIT_ENV: &str = "ECHO_WORKER_REJECT_INIT";
const INIT_DELAY_ENV: &str = "ECHO_WORKER_INIT_DELAY_MS";

/// Application-level error code for injected and tool failures.
const TOOL_ERROR: i64 = -32000;

struct EchoWorker {
    fail: HashSet<String>,
    init_delay: Duration,
}

impl EchoWorker {
    fn from_env() -> Self {
        let mut fail: HashSet<String> = std::env::var(FAIL_ENV)
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        if std::env::var(REJECT_INIT_ENV).is_ok_and(|v| !v.is_empty()) {
            fail.insert(METHOD_INITIALIZE.to_string());
        }
        let init_delay = std::env::var(INIT_DELAY_ENV)
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or_default();
        Self { fail, init_delay }
    }

    fn injected(&self, what: &str) -> Result<(), RpcError> {
        if self.fail.contains(what) {
            return Err(RpcError::new(TOOL_ERROR, format!("{what} failed on purpose")));
        }
        Ok(())
    }
}

fn number(arguments: &Value, key: &str) -> Result<f64, RpcError> {
    arguments[key].as_f64().ok_or_else(|| {
        RpcError::new(
            error_codes::INVALID_PARAMS,
            format!("argument {key} must be a number"),
        )
    })
}

#[async_trait::async_trait]
impl ToolHandler for EchoWorker {
    fn server_info(&self) -> Implementation {
        Implementation {
            name: "mcp-echo-worker".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    async fn initialize(&self, params: &InitializeParams) -> Result<(), RpcError> {
        tracing::debug!(client = %params.client_info.name, "Initialize");
        if !self.init_delay.is_zero() {
            tokio::time::sleep(self.init_delay).await;
        }
        self.injected(METHOD_INITIALIZE)
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, RpcError> {
        self.injected(METHOD_TOOLS_LIST)?;
        Ok(vec![
            ToolDescriptor {
                name: "echo_tool".to_string(),
                description: Some("Return the arguments unchanged".to_string()),
                input_schema: json!({"type": "object"}),
            },
            ToolDescriptor {
                name: "add".to_string(),
                description: Some("Add two numbers".to_string()),
                input_schema: json!({
                    "type": "object",
                    "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
                    "required": ["a", "b"]
                }),
            },
            ToolDescriptor {
                name: "sleep".to_string(),
                description: Some("Wait for `ms` milliseconds".to_string()),
                input_schema: json!({
                    "type": "object",
                    "properties": {"ms": {"type": "integer"}}
                }),
            },
            ToolDescriptor {
                name: "fail".to_string(),
                description: Some("Always answer with an error".to_string()),
                input_schema: json!({"type": "object"}),
            },
        ])
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, RpcError> {
        self.injected(name)?;
        match name {
            "echo_tool" => Ok(arguments),
            "add" => {
                let sum = number(&arguments, "a")? + number(&arguments, "b")?;
                // Integers stay integers on the wire.
                if sum.fract() == 0.0 && sum.abs() < i64::MAX as f64 {
                    Ok(json!(sum as i64))
                } else {
                    Ok(json!(sum))
                }
            }
            "sleep" => {
                let ms = arguments["ms"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(json!(ms))
            }
            "fail" => Err(RpcError::new(TOOL_ERROR, "tool failed")),
            other => Err(RpcError::new(
                error_codes::METHOD_NOT_FOUND,
                format!("Unknown tool: {other}"),
            )),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    run_worker(Arc::new(EchoWorker::from_env())).await?;
    Ok(())
}
