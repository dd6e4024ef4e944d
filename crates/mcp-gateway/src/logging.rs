//! Tracing subscriber set-up shared by the gateway and worker binaries.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Level for the crate's own targets when `RUST_LOG` is unset.
pub const LOG_LEVEL_ENV: &str = "MCP_GATEWAY_LOG";

/// Filter directives for a `MCP_GATEWAY_LOG` value.
///
/// Worker stderr is re-emitted under `mcp_gateway::worker`, so it follows the
/// same level.
pub fn filter_directives(level: Option<&str>) -> String {
    let level = match level {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("warn") | Some("warning") => "warn",
        Some("error") => "error",
        _ => "info",
    };
    format!("mcp_gateway={level},mcp_echo_worker={level},tower_http=warn")
}

/// Install the global subscriber. Output goes to stderr, as JSON when
/// `LOG_FORMAT=json`. A second call is a no-op.
pub fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = std::env::var(LOG_LEVEL_ENV).ok();
        EnvFilter::new(filter_directives(level.as_deref()))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}
