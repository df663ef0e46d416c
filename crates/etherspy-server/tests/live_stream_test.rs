//! Integration tests for the live snapshot WebSocket server.
//!
//! These tests start an actual server and connect with a WebSocket client
//! to verify end-to-end functionality.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;

use etherspy_server::shutdown::{self, ShutdownTrigger};
use etherspy_server::{
    Broadcaster, InMemoryStore, IngestPipeline, LiveServer, LiveServerConfig, Origin,
    StatisticsCollector,
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start a test server on an ephemeral port.
async fn start_test_server() -> (SocketAddr, IngestPipeline, ShutdownTrigger) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let store = Arc::new(InMemoryStore::new());
    let pipeline = IngestPipeline::new(
        store.clone(),
        store,
        Broadcaster::new(),
        Arc::new(StatisticsCollector::new()),
    );

    let config = LiveServerConfig {
        name: "test-server".to_string(),
        version: "0.1.0".to_string(),
        bind_addr: addr,
    };
    let (trigger, shutdown) = shutdown::channel();
    let server = LiveServer::new(config, pipeline.clone());
    tokio::spawn(async move {
        let _ = server.run_with_listener(listener, shutdown).await;
    });

    (addr, pipeline, trigger)
}

async fn connect_client(addr: SocketAddr) -> Client {
    let url = format!("ws://{}/", addr);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("Failed to connect");
    ws_stream
}

/// Wait for a JSON text message with timeout.
async fn recv_json(ws: &mut Client) -> Result<Value, &'static str> {
    match timeout(Duration::from_secs(5), ws.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => serde_json::from_str(&text).map_err(|_| "Invalid JSON"),
        Ok(Some(Ok(_))) => Err("Unexpected message type"),
        Ok(Some(Err(_))) => Err("WebSocket error"),
        Ok(None) => Err("Connection closed"),
        Err(_) => Err("Timeout"),
    }
}

/// Connect and consume the hello and initial snapshot.
async fn connect_ready(addr: SocketAddr) -> (Client, Value) {
    let mut ws = connect_client(addr).await;
    let hello = recv_json(&mut ws).await.expect("Should receive hello");
    assert_eq!(hello["event"], "hello");
    let initial = recv_json(&mut ws).await.expect("Should receive snapshot");
    assert_eq!(initial["event"], "new_data");
    (ws, initial)
}

#[tokio::test]
async fn test_hello_then_snapshot_on_connect() {
    let (addr, pipeline, trigger) = start_test_server().await;
    pipeline.ingest(json!({"id": 7, "model": "Nexus-TH"}), Origin::Engine).await;

    let mut ws = connect_client(addr).await;
    let hello = recv_json(&mut ws).await.unwrap();
    assert_eq!(hello["data"]["name"], "test-server");
    assert_eq!(hello["data"]["version"], "0.1.0");
    assert!(hello["data"]["timestamp"].is_string());

    let snapshot = recv_json(&mut ws).await.unwrap();
    assert_eq!(snapshot["event"], "new_data");
    assert_eq!(snapshot["data"][0]["sensor_id"], "7");
    assert_eq!(snapshot["data"][0]["model"], "Nexus-TH");

    ws.close(None).await.ok();
    trigger.trigger();
}

#[tokio::test]
async fn test_snapshot_broadcast_after_insert() {
    let (addr, pipeline, trigger) = start_test_server().await;
    let (mut a, initial) = connect_ready(addr).await;
    let (mut b, _) = connect_ready(addr).await;
    assert!(initial["data"].as_array().unwrap().is_empty());

    pipeline.ingest(json!({"id": "A", "temperature_C": 1.0}), Origin::Engine).await;
    pipeline.ingest(json!({"id": "B", "temperature_C": 2.0}), Origin::Broker).await;

    for ws in [&mut a, &mut b] {
        let first = recv_json(ws).await.unwrap();
        assert_eq!(first["data"].as_array().unwrap().len(), 1);

        let second = recv_json(ws).await.unwrap();
        let rows = second["data"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["sensor_id"], "B");
        assert_eq!(rows[1]["sensor_id"], "A");
    }

    trigger.trigger();
}

#[tokio::test]
async fn test_rejected_telemetry_is_not_broadcast() {
    let (addr, pipeline, trigger) = start_test_server().await;
    let (mut ws, _) = connect_ready(addr).await;

    pipeline.ingest(json!({"model": "no id"}), Origin::Engine).await;
    pipeline.ingest(json!({"id": 1}), Origin::Engine).await;

    let msg = recv_json(&mut ws).await.unwrap();
    assert_eq!(msg["data"][0]["sensor_id"], "1");

    trigger.trigger();
}

#[tokio::test]
async fn test_snapshot_request() {
    let (addr, pipeline, trigger) = start_test_server().await;
    let (mut ws, _) = connect_ready(addr).await;

    pipeline.ingest(json!({"id": 3}), Origin::Engine).await;
    let _ = recv_json(&mut ws).await.unwrap();

    ws.send(Message::Text(r#"{"request":"snapshot"}"#.to_string()))
        .await
        .unwrap();
    let msg = recv_json(&mut ws).await.unwrap();
    assert_eq!(msg["event"], "new_data");
    assert_eq!(msg["data"][0]["sensor_id"], "3");

    // Unknown requests are ignored; the connection stays usable.
    ws.send(Message::Text("reboot".to_string())).await.unwrap();
    ws.send(Message::Text(r#"{"request":"snapshot"}"#.to_string()))
        .await
        .unwrap();
    let msg = recv_json(&mut ws).await.unwrap();
    assert_eq!(msg["data"][0]["sensor_id"], "3");

    trigger.trigger();
}

#[tokio::test]
async fn test_live_client_count() {
    let (addr, pipeline, trigger) = start_test_server().await;
    let (ws, _) = connect_ready(addr).await;
    assert_eq!(pipeline.stats().snapshot().live_clients, 1);

    drop(ws);
    let mut remaining = usize::MAX;
    for _ in 0..50 {
        remaining = pipeline.stats().snapshot().live_clients;
        if remaining == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(remaining, 0);

    trigger.trigger();
}

#[tokio::test]
async fn test_shutdown_closes_clients() {
    let (addr, _pipeline, trigger) = start_test_server().await;
    let (mut ws, _) = connect_ready(addr).await;

    trigger.trigger();
    let closed = timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}
