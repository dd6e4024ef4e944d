//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::service::GatewayService;

use super::routes::routes;

/// Env var overriding the listen port.
pub const PORT_ENV: &str = "PORT";
/// Env var overriding the listen address.
pub const HOST_ENV: &str = "MCP_GATEWAY_HOST";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// If true, ignore SIGTERM and wait for explicit /shutdown or SIGINT.
    pub await_explicit_shutdown: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            await_explicit_shutdown: false,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `MCP_GATEWAY_HOST` and `PORT`. An unparseable
    /// port is ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(host) = std::env::var(HOST_ENV)
            && !host.is_empty()
        {
            config.host = host;
        }
        if let Ok(port) = std::env::var(PORT_ENV) {
            match port.parse() {
                Ok(port) => config.port = port,
                Err(e) => tracing::warn!(%port, error = %e, "Ignoring invalid PORT"),
            }
        }
        config
    }
}

/// Bind and serve until a shutdown signal, then stop every worker.
pub async fn serve(config: ServerConfig, service: Arc<GatewayService>) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    serve_with_listener(listener, config, service).await
}

/// Serve on an already-bound listener.
///
/// Every way of stopping (SIGINT, SIGTERM, `POST /shutdown`) raises the
/// service's shutdown flag; the server drains once the flag is set and then
/// stops every worker.
pub async fn serve_with_listener(
    listener: TcpListener,
    config: ServerConfig,
    service: Arc<GatewayService>,
) -> anyhow::Result<()> {
    let app = routes(Arc::clone(&service));

    let actual_addr = listener.local_addr()?;
    info!(addr = %actual_addr, "mcp-gateway listening");

    let signals = tokio::spawn(forward_signals(
        Arc::clone(&service),
        config.await_explicit_shutdown,
    ));

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_requested(service.shutdown_rx()))
        .await;
    signals.abort();

    service.trigger_shutdown();
    service.shutdown().await;
    info!("Gateway stopped");

    served.map_err(Into::into)
}

/// Resolve once the service's shutdown flag is raised.
async fn shutdown_requested(mut shutdown_rx: watch::Receiver<bool>) {
    // The sender lives in the service, which outlives the server.
    let _ = shutdown_rx.wait_for(|requested| *requested).await;
    info!("Shutdown requested, draining connections");
}

/// Turn the first process signal into a service shutdown request.
async fn forward_signals(service: Arc<GatewayService>, ignore_sigterm: bool) {
    let signal = tokio::select! {
        _ = sigint() => "SIGINT",
        _ = sigterm(ignore_sigterm) => "SIGTERM",
    };
    info!(signal, "Signal received");
    service.trigger_shutdown();
}

async fn sigint() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for SIGINT");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn sigterm(ignore: bool) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut stream = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM");
            return std::future::pending::<()>().await;
        }
    };
    // Registering the handler replaces the default action, so an ignored
    // SIGTERM really is ignored.
    while stream.recv().await.is_some() {
        if !ignore {
            return;
        }
        info!("Ignoring SIGTERM; waiting for SIGINT or POST /shutdown");
    }
    std::future::pending::<()>().await
}

#[cfg(not(unix))]
async fn sigterm(_ignore: bool) {
    std::future::pending::<()>().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert!(!config.await_explicit_shutdown);
    }

    #[tokio::test]
    async fn explicit_shutdown_stops_server() {
        use crate::config::{GatewayConfig, WorkerCatalog};

        let service = Arc::new(GatewayService::new(
            WorkerCatalog::default(),
            GatewayConfig::default(),
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = tokio::spawn(serve_with_listener(
            listener,
            ServerConfig {
                await_explicit_shutdown: true,
                ..ServerConfig::default()
            },
            Arc::clone(&service),
        ));

        service.trigger_shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(service.health().status, crate::health::Health::ShuttingDown);
    }

    #[tokio::test]
    async fn shutdown_requested_sees_flag_raised_earlier() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), shutdown_requested(rx))
            .await
            .unwrap();
    }
}
