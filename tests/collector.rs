//! End-to-end tests against a stub collector served over real HTTP.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{patch, post};
use axum::Router;
use tempfile::TempDir;

use pour::config::Config;
use pour::{
    Color, Emitter, EventBuffer, HttpTransport, LocalPersister, Pour, RunId, ShipmentLoop,
    TickOutcome,
};

#[derive(Debug, Clone)]
struct Request {
    headers: HeaderMap,
    body: serde_json::Value,
}

#[derive(Clone)]
struct Collector {
    status: StatusCode,
    logs: Arc<Mutex<Vec<Request>>>,
    hardware: Arc<Mutex<Vec<Request>>>,
}

impl Collector {
    fn log_posts(&self) -> Vec<Request> {
        self.logs.lock().unwrap().clone()
    }

    fn hardware_patches(&self) -> Vec<Request> {
        self.hardware.lock().unwrap().clone()
    }
}

async fn receive_logs(
    State(collector): State<Collector>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let body = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    collector.logs.lock().unwrap().push(Request { headers, body });
    collector.status
}

async fn receive_hardware(
    State(collector): State<Collector>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let body = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    collector.hardware.lock().unwrap().push(Request { headers, body });
    collector.status
}

/// Serve a collector answering every request with `status`.
async fn spawn_collector(status: StatusCode) -> (Collector, u16) {
    let collector = Collector {
        status,
        logs: Arc::new(Mutex::new(Vec::new())),
        hardware: Arc::new(Mutex::new(Vec::new())),
    };

    let app = Router::new()
        .route("/logs", post(receive_logs))
        .route("/logs/projects/hardware", patch(receive_hardware))
        .with_state(collector.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (collector, port)
}

fn remote_config(port: u16, dir: &TempDir) -> Config {
    Config {
        remote_logs: true,
        host: "127.0.0.1".to_string(),
        port,
        project_key: "project-key".to_string(),
        client: "test-client".to_string(),
        client_key: "client-secret".to_string(),
        tls: false,
        log_path: dir.path().to_path_buf(),
        console: false,
        request_timeout: Duration::from_secs(5),
        ship_interval: Duration::from_millis(50),
        hardware_interval: Duration::from_secs(60),
        cpu_sample_window: Duration::from_millis(200),
        ..Config::default()
    }
}

fn emitter(dir: &TempDir) -> (Emitter, Arc<EventBuffer>) {
    let buffer = Arc::new(EventBuffer::new());
    let persister = Arc::new(LocalPersister::new(dir.path()));
    persister.set_run_id(RunId::new("collector-test")).unwrap();
    let (emitter, dispatcher) = Emitter::new(buffer.clone(), persister, false);
    tokio::spawn(dispatcher.run());
    (emitter, buffer)
}

#[tokio::test]
async fn test_accepting_collector_receives_batch_and_buffer_empties() {
    let (collector, port) = spawn_collector(StatusCode::ACCEPTED).await;
    let dir = TempDir::new().unwrap();
    let config = remote_config(port, &dir);

    let (emitter, buffer) = emitter(&dir);
    let transport = Arc::new(HttpTransport::new(&config).unwrap());
    let shipment = ShipmentLoop::new(
        buffer.clone(),
        transport,
        emitter.clone(),
        10,
        config.ship_interval,
    );

    emitter.log_color(true, Color::White, "alpha");
    emitter.log_tagged(true, 3, "beta");
    emitter.flush().await;
    assert_eq!(buffer.len(), 2);

    assert_eq!(shipment.tick().await, TickOutcome::Shipped(2));
    assert!(buffer.is_empty());

    let posts = collector.log_posts();
    assert_eq!(posts.len(), 1);

    let request = &posts[0];
    assert_eq!(request.headers["x-client"], "test-client");
    assert_eq!(request.headers["authorization"], "client-secret");
    assert_eq!(request.headers["x-key"], "project-key");

    let events = request.body.as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["log"], "alpha");
    assert_eq!(events[0]["tag"]["index"], 0);
    assert!(events[1]["log"].as_str().unwrap().ends_with("beta"));
    assert_eq!(events[1]["tag"]["name"], "Error");
    assert!(events[1]["file_name"].as_str().unwrap().ends_with("collector.rs"));
    assert!(events[1]["file_line"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_failing_collector_trips_ceiling_and_stops_calling() {
    let (collector, port) = spawn_collector(StatusCode::INTERNAL_SERVER_ERROR).await;
    let dir = TempDir::new().unwrap();
    let config = remote_config(port, &dir);

    let (emitter, buffer) = emitter(&dir);
    let transport = Arc::new(HttpTransport::new(&config).unwrap());
    let ceiling = 3;
    let shipment = ShipmentLoop::new(
        buffer.clone(),
        transport,
        emitter.clone(),
        ceiling,
        config.ship_interval,
    );

    emitter.log("pending forever");
    emitter.flush().await;

    for _ in 0..ceiling {
        assert!(matches!(shipment.tick().await, TickOutcome::Failed { .. }));
    }
    assert_eq!(
        shipment.tick().await,
        TickOutcome::Tripped {
            failures: ceiling + 1
        }
    );
    assert!(!shipment.is_enabled());

    for _ in 0..3 {
        assert_eq!(shipment.tick().await, TickOutcome::Disabled);
    }
    assert_eq!(collector.log_posts().len(), (ceiling + 1) as usize);

    // Nothing was drained: the original event plus every diagnostic remain
    emitter.flush().await;
    let events = buffer.snapshot();
    assert!(events[0].message().ends_with("pending forever"));
    assert_eq!(events.len(), 1 + ceiling as usize + 1);
}

#[tokio::test]
async fn test_unreachable_collector_counts_failures() {
    // Bind and release a port so nothing is listening on it
    let port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let dir = TempDir::new().unwrap();
    let config = remote_config(port, &dir);

    let (emitter, buffer) = emitter(&dir);
    let transport = Arc::new(HttpTransport::new(&config).unwrap());
    let shipment = ShipmentLoop::new(
        buffer.clone(),
        transport,
        emitter.clone(),
        10,
        config.ship_interval,
    );

    emitter.log("offline");
    emitter.flush().await;

    assert_eq!(shipment.tick().await, TickOutcome::Failed { failures: 1 });
    assert!(!buffer.is_empty());
}

#[tokio::test]
async fn test_remote_disabled_keeps_events_and_writes_file_in_order() {
    let dir = TempDir::new().unwrap();
    let (emitter, buffer) = emitter(&dir);

    emitter.log("first");
    emitter.log("second");
    emitter.log("third");
    emitter.flush().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(buffer.len(), 3);

    let path = dir.path().join("logs").join("collector-test.log");
    let contents = std::fs::read_to_string(path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].ends_with("first"));
    assert!(lines[1].ends_with("second"));
    assert!(lines[2].ends_with("third"));
}

#[tokio::test]
async fn test_pour_ships_logs_and_hardware_to_collector() {
    let (collector, port) = spawn_collector(StatusCode::ACCEPTED).await;
    let dir = TempDir::new().unwrap();

    let mut pour = Pour::bootstrap(remote_config(port, &dir));
    pour.start();
    assert!(pour.is_remote_enabled());

    pour::log_event!(pour.emitter(), "shipped", "via", "pour");
    pour.emitter().flush().await;

    tokio::time::timeout(Duration::from_secs(10), async {
        while !pour.buffer().is_empty() || collector.hardware_patches().is_empty() {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("logs and hardware should reach the collector");

    let shipped: Vec<String> = collector
        .log_posts()
        .iter()
        .flat_map(|r| r.body.as_array().cloned().unwrap_or_default())
        .filter_map(|e| e["log"].as_str().map(str::to_string))
        .collect();
    assert!(shipped.iter().any(|m| m.ends_with("shipped via pour")));

    let hardware = &collector.hardware_patches()[0];
    assert_eq!(hardware.headers["x-key"], "project-key");
    assert!(hardware.body["memory_total"].as_u64().unwrap() > 0);
    assert!(hardware.body["cpus"].is_array());

    let log_file = pour.persister().log_file().unwrap();
    let contents = std::fs::read_to_string(log_file).unwrap();
    assert!(contents.contains("shipped via pour"));

    pour.shutdown().await;
}
