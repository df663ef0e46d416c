//! A settings POST restarts a running engine with the new values.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::json;
use tempfile::TempDir;
use tower::ServiceExt;

use etherspy_core::CommandBuilder;
use etherspy_server::{
    shutdown, Broadcaster, InMemoryStore, IngestPipeline, ProcessSupervisor, StatisticsCollector,
    StreamDemultiplexer, SupervisorConfig,
};
use etherspy_web::{create_router, AppState};

/// Poll until the store holds at least `count` records or five seconds pass.
async fn wait_for_records(store: &InMemoryStore, count: usize) -> bool {
    for _ in 0..100 {
        if store.len().await >= count {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_settings_post_relaunches_engine() {
    let dir = TempDir::new().unwrap();
    let engine = dir.path().join("engine.sh");
    // Reports the frequency it was launched with as the source id.
    std::fs::write(
        &engine,
        r#"#!/bin/sh
trap 'exit 0' TERM
freq=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-f" ]; then freq="$2"; fi
  shift
done
echo "{\"id\":\"$freq\"}"
sleep 30 >/dev/null 2>&1 &
wait
"#,
    )
    .unwrap();
    std::fs::set_permissions(&engine, std::fs::Permissions::from_mode(0o755)).unwrap();

    let store = Arc::new(InMemoryStore::new());
    let stats = Arc::new(StatisticsCollector::new());
    let pipeline = IngestPipeline::new(store.clone(), store.clone(), Broadcaster::new(), stats.clone());
    let supervisor = ProcessSupervisor::new(
        CommandBuilder::new(engine.to_string_lossy()),
        store.clone(),
        StreamDemultiplexer::new(pipeline, Vec::new()),
        stats.clone(),
        SupervisorConfig {
            backoff: Duration::from_millis(100),
            grace_period: Duration::from_secs(2),
        },
    );
    let state = AppState {
        records: store.clone(),
        settings: store.clone(),
        aliases: store.clone(),
        restart: supervisor.restart_handle(),
        stats: stats.clone(),
    };
    let (trigger, shutdown) = shutdown::channel();
    let task = tokio::spawn(supervisor.run(shutdown));

    assert!(wait_for_records(&store, 1).await);
    assert_eq!(store.records().await[0].sensor_id, "433.92M");

    let request = Request::post("/api/settings")
        .header("content-type", "application/json")
        .body(Body::from(json!({"sdr_freq": "868.3M"}).to_string()))
        .unwrap();
    let response = create_router(state, None).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body, json!({"status": "success"}));

    assert!(wait_for_records(&store, 2).await);
    assert_eq!(store.records().await[1].sensor_id, "868.3M");
    assert!(stats.launches() >= 2);

    trigger.trigger();
    tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
}
