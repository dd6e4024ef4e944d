use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use mcp_gateway::logging::init_tracing;
use mcp_gateway::{GatewayConfig, GatewayService, ServerConfig, WorkerCatalog, serve};

#[derive(Debug, Default, PartialEq)]
struct Args {
    catalog: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
    await_explicit_shutdown: bool,
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let args = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!("Usage: mcp-gateway [--catalog <file>] [--host <addr>] [--port <port>]");
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --catalog <file>            Worker catalog JSON [env: MCP_GATEWAY_CATALOG]");
            eprintln!("  --host <addr>               Listen address [env: MCP_GATEWAY_HOST] [default: 0.0.0.0]");
            eprintln!("  --port <port>               Listen port [env: PORT] [default: 3000]");
            eprintln!("  --await-explicit-shutdown   Ignore SIGTERM; stop on SIGINT or POST /shutdown");
            process::exit(2);
        }
    };

    init_tracing();

    if let Err(e) = run(args) {
        tracing::error!("Gateway failed: {e:#}");
        process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut parsed = Args::default();

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--catalog" => {
                i += 1;
                parsed.catalog = Some(PathBuf::from(
                    args.get(i).ok_or("--catalog requires a value")?,
                ));
            }
            "--host" => {
                i += 1;
                parsed.host = Some(args.get(i).ok_or("--host requires a value")?.clone());
            }
            "--port" => {
                i += 1;
                let value = args.get(i).ok_or("--port requires a value")?;
                parsed.port = Some(
                    value
                        .parse()
                        .map_err(|_| format!("invalid port: {value}"))?,
                );
            }
            "--await-explicit-shutdown" => parsed.await_explicit_shutdown = true,
            "--help" | "-h" => return Err(String::new()),
            arg => return Err(format!("unexpected argument: {arg}")),
        }
        i += 1;
    }

    Ok(parsed)
}

#[tokio::main]
async fn run(args: Args) -> anyhow::Result<()> {
    let catalog = WorkerCatalog::load(args.catalog.as_deref())?;
    tracing::info!(workers = catalog.len(), "Loaded worker catalog");

    let mut config = ServerConfig::from_env();
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    config.await_explicit_shutdown = args.await_explicit_shutdown;

    let service = Arc::new(GatewayService::new(catalog, GatewayConfig::default()));
    serve(config, service).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        std::iter::once("mcp-gateway")
            .chain(args.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn no_flags_is_all_defaults() {
        assert_eq!(parse_args(&argv(&[])).unwrap(), Args::default());
    }

    #[test]
    fn parses_every_flag() {
        let args = parse_args(&argv(&[
            "--catalog",
            "workers.json",
            "--host",
            "127.0.0.1",
            "--port",
            "8080",
            "--await-explicit-shutdown",
        ]))
        .unwrap();
        assert_eq!(
            args,
            Args {
                catalog: Some(PathBuf::from("workers.json")),
                host: Some("127.0.0.1".to_string()),
                port: Some(8080),
                await_explicit_shutdown: true,
            }
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(
            parse_args(&argv(&["--port", "http"])).unwrap_err(),
            "invalid port: http"
        );
        assert_eq!(
            parse_args(&argv(&["--catalog"])).unwrap_err(),
            "--catalog requires a value"
        );
        assert_eq!(
            parse_args(&argv(&["serve"])).unwrap_err(),
            "unexpected argument: serve"
        );
        assert_eq!(parse_args(&argv(&["--help"])).unwrap_err(), "");
    }
}
