//! End-to-end tests against real `mcp-echo-worker` processes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use mcp_gateway::transport::http::routes;
use mcp_gateway::{
    CommandSpawner, GatewayConfig, GatewayError, GatewayService, SpawnError, StartOutcome,
    ToolListing, WorkerCatalog, WorkerDescriptor, WorkerSpawner,
};

const ECHO_WORKER: &str = env!("CARGO_BIN_EXE_mcp-echo-worker");

fn echo(name: &str) -> WorkerDescriptor {
    WorkerDescriptor::new(name, ECHO_WORKER)
        .with_description(format!("Echo worker {name}"))
        .with_env("MCP_GATEWAY_LOG", "warn")
}

/// Real process spawner that counts launches and remembers pids.
#[derive(Default)]
struct CountingSpawner {
    spawned: AtomicUsize,
    pids: Mutex<Vec<u32>>,
}

impl WorkerSpawner for CountingSpawner {
    fn spawn(&self, descriptor: &WorkerDescriptor) -> Result<tokio::process::Child, SpawnError> {
        let child = CommandSpawner.spawn(descriptor)?;
        self.spawned.fetch_add(1, Ordering::SeqCst);
        if let Some(pid) = child.id() {
            self.pids.lock().unwrap().push(pid);
        }
        Ok(child)
    }
}

fn service_with(
    workers: Vec<WorkerDescriptor>,
    config: GatewayConfig,
) -> (Arc<GatewayService>, Arc<CountingSpawner>) {
    let spawner = Arc::new(CountingSpawner::default());
    let catalog = WorkerCatalog::new(workers).unwrap();
    let service = GatewayService::with_spawner(catalog, config, spawner.clone());
    (Arc::new(service), spawner)
}

#[cfg(unix)]
fn process_exists(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[tokio::test]
async fn start_call_list_and_stop() {
    let (service, _) = service_with(vec![echo("echo")], GatewayConfig::default());

    let outcome = service.start_worker("echo").await.unwrap();
    assert!(matches!(outcome, StartOutcome::Started(_)));
    let info = outcome.handle().server_info().unwrap();
    assert_eq!(
        info.server_info.as_ref().unwrap().name,
        "mcp-echo-worker"
    );

    let echoed = service
        .call_tool("echo", "echo_tool", json!({"message": "hi", "n": [1, 2]}))
        .await
        .unwrap();
    assert_eq!(echoed, json!({"message": "hi", "n": [1, 2]}));

    let tools = service.list_tools("echo").await.unwrap();
    let names: Vec<&str> = tools["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|tool| tool["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["echo_tool", "add", "sleep", "fail"]);

    let sum = service
        .call_tool("echo", "add", json!({"a": 2, "b": 3}))
        .await
        .unwrap();
    assert_eq!(sum, json!(5));

    service.stop_worker("echo").await.unwrap();
    assert!(matches!(
        service.list_tools("echo").await,
        Err(GatewayError::NotRunning(_))
    ));
    assert!(matches!(
        service.call_tool("echo", "add", json!({"a": 1, "b": 1})).await,
        Err(GatewayError::NotRunning(_))
    ));
    assert!(matches!(
        service.stop_worker("echo").await,
        Err(GatewayError::NotRunning(_))
    ));
}

#[tokio::test]
async fn concurrent_starts_spawn_one_process() {
    let worker = echo("echo").with_env("ECHO_WORKER_INIT_DELAY_MS", "200");
    let (service, spawner) = service_with(vec![worker], GatewayConfig::default());

    let starts = (0..5).map(|_| service.start_worker("echo"));
    let outcomes: Vec<StartOutcome> = futures::future::join_all(starts)
        .await
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(spawner.spawned.load(Ordering::SeqCst), 1);
    let started = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, StartOutcome::Started(_)))
        .count();
    assert_eq!(started, 1);
    let first = outcomes[0].handle();
    assert!(outcomes.iter().all(|o| Arc::ptr_eq(o.handle(), first)));

    service.shutdown().await;
}

#[tokio::test]
async fn remote_error_is_returned_and_worker_keeps_serving() {
    let (service, _) = service_with(vec![echo("echo")], GatewayConfig::default());
    service.start_worker("echo").await.unwrap();

    let err = service
        .call_tool("echo", "fail", json!({}))
        .await
        .unwrap_err();
    match err {
        GatewayError::Remote { code, message, .. } => {
            assert_eq!(code, -32000);
            assert_eq!(message, "tool failed");
        }
        other => panic!("expected remote error, got {other:?}"),
    }

    let sum = service
        .call_tool("echo", "add", json!({"a": 1.5, "b": 1}))
        .await
        .unwrap();
    assert_eq!(sum, json!(2.5));

    service.shutdown().await;
}

#[tokio::test]
async fn timeout_leaves_worker_running() {
    let config = GatewayConfig::default().with_request_timeout(Duration::from_millis(200));
    let (service, _) = service_with(vec![echo("echo")], config);
    service.start_worker("echo").await.unwrap();

    let err = service
        .call_tool("echo", "sleep", json!({"ms": 1000}))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Timeout(_)));
    assert_eq!(err.to_string(), "Request timeout after 200ms");

    let handle = service.registry().get("echo").unwrap();
    assert!(handle.is_alive());
    assert_eq!(handle.pending_calls(), 0);
    let sum = service
        .call_tool("echo", "add", json!({"a": 2, "b": 2}))
        .await
        .unwrap();
    assert_eq!(sum, json!(4));

    service.shutdown().await;
}

#[tokio::test]
async fn broadcast_reports_failing_worker_alongside_healthy_ones() {
    let workers = vec![
        echo("alpha"),
        echo("beta"),
        echo("broken").with_env("ECHO_WORKER_FAIL_LIST", "tools/list"),
    ];
    let (service, _) = service_with(workers, GatewayConfig::default());
    for name in ["alpha", "beta", "broken"] {
        service.start_worker(name).await.unwrap();
    }

    let listings = service.broadcast_list_tools().await;
    assert_eq!(
        listings.keys().map(String::as_str).collect::<Vec<_>>(),
        ["alpha", "beta", "broken"]
    );
    for name in ["alpha", "beta"] {
        match &listings[name] {
            ToolListing::Tools { tools } => assert_eq!(tools.as_array().unwrap().len(), 4),
            other => panic!("{name}: expected tools, got {other:?}"),
        }
    }
    assert_eq!(
        listings["broken"],
        ToolListing::Error {
            error: "tools/list failed on purpose".to_string()
        }
    );

    service.shutdown().await;
    assert_eq!(service.registry().active_count(), 0);
}

#[tokio::test]
async fn sessions_start_workers_on_demand() {
    let (service, spawner) = service_with(vec![echo("echo")], GatewayConfig::default());

    let first = service.create_session();
    let second = service.create_session();
    assert_ne!(first, second);

    let result = service
        .execute_in_session(first, "echo", "add", json!({"a": 20, "b": 22}))
        .await
        .unwrap();
    assert_eq!(result, json!(42));
    assert_eq!(spawner.spawned.load(Ordering::SeqCst), 1);

    let session = service.get_session(first).unwrap();
    assert!(session.workers.contains("echo"));
    assert!(service.get_session(second).unwrap().workers.is_empty());

    assert!(service.remove_session(first));
    assert!(matches!(
        service
            .execute_in_session(first, "echo", "add", json!({"a": 1, "b": 1}))
            .await,
        Err(GatewayError::SessionNotFound(_))
    ));

    service.shutdown().await;
}

#[tokio::test]
async fn spawn_failure_is_reported() {
    let missing = WorkerDescriptor::new("ghost", "/nonexistent/mcp-worker-binary");
    let (service, spawner) = service_with(vec![missing], GatewayConfig::default());

    let err = service.start_worker("ghost").await.unwrap_err();
    assert!(matches!(err, GatewayError::Spawn { .. }));
    assert_eq!(spawner.spawned.load(Ordering::SeqCst), 0);
    assert!(!service.list_workers()[0].active);
}

#[cfg(unix)]
#[tokio::test]
async fn rejected_handshake_leaves_no_process() {
    let worker = echo("picky").with_env("ECHO_WORKER_REJECT_INIT", "1");
    let (service, spawner) = service_with(vec![worker], GatewayConfig::default());

    let err = service.start_worker("picky").await.unwrap_err();
    assert!(matches!(err, GatewayError::Handshake { .. }));
    assert!(err.to_string().contains("initialize failed on purpose"));

    let pid = spawner.pids.lock().unwrap()[0];
    assert!(!process_exists(pid));
    assert!(service.health().active_servers.is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn crashed_worker_is_replaced_on_next_start() {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let (service, spawner) = service_with(vec![echo("echo")], GatewayConfig::default());
    let handle = service.start_worker("echo").await.unwrap().into_handle();
    let pid = handle.pid().unwrap();

    kill(Pid::from_raw(pid as i32), Signal::SIGKILL).unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while handle.is_alive() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert!(matches!(
        handle.call_tool("add", json!({"a": 1, "b": 1})).await,
        Err(GatewayError::WorkerExited(_))
    ));
    assert!(matches!(
        service.list_tools("echo").await,
        Err(GatewayError::NotRunning(_))
    ));

    let replacement = service.start_worker("echo").await.unwrap();
    assert!(matches!(replacement, StartOutcome::Started(_)));
    assert_ne!(replacement.handle().pid(), Some(pid));
    assert_eq!(spawner.spawned.load(Ordering::SeqCst), 2);

    service.shutdown().await;
}

async fn response_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn http_surface_drives_a_real_worker() {
    let (service, _) = service_with(vec![echo("echo")], GatewayConfig::default());
    let app = routes(Arc::clone(&service));

    let response = app
        .clone()
        .oneshot(post("/api/servers/echo/start", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response_json(response).await,
        json!({"message": "Server echo started successfully"})
    );

    let response = app
        .clone()
        .oneshot(post("/api/servers/echo/start", json!({})))
        .await
        .unwrap();
    assert_eq!(
        response_json(response).await,
        json!({"message": "Server echo already running"})
    );

    let response = app
        .clone()
        .oneshot(post(
            "/api/servers/echo/tools/add",
            json!({"arguments": {"a": 2, "b": 3}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await, json!(5));

    let response = app
        .clone()
        .oneshot(post("/api/servers/echo/tools/fail", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response_json(response).await, json!({"error": "tool failed"}));

    let response = app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let health = response_json(response).await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["activeServers"], json!(["echo"]));

    let response = app
        .clone()
        .oneshot(post("/api/servers/echo/stop", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::get("/api/servers/echo/tools")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response_json(response).await,
        json!({"error": "Server not running: echo"})
    );
}
