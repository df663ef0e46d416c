//! Both ingestion paths feeding one SQLite-backed pipeline.

use std::sync::Arc;

use tempfile::TempDir;

use etherspy_core::Configuration;
use etherspy_server::{
    Broadcaster, BrokerConfig, BrokerIngest, IngestOutcome, IngestPipeline, LineKind,
    SqliteStore, StatisticsCollector, StreamDemultiplexer, TelemetryStore,
};

const EVENT: &str = r#"{"time":"2024-01-17T10:30:00","model":"Oregon-THGR122N","id":163,"channel":1,"battery_ok":1,"temperature_C":19.3,"humidity":51}"#;

async fn setup() -> (TempDir, Arc<SqliteStore>, StreamDemultiplexer, BrokerIngest) {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(
        SqliteStore::open(dir.path().join("etherspy.db"), &Configuration::defaults())
            .await
            .unwrap(),
    );
    let pipeline = IngestPipeline::new(
        store.clone(),
        store.clone(),
        Broadcaster::new(),
        Arc::new(StatisticsCollector::new()),
    );
    let demux = StreamDemultiplexer::new(pipeline.clone(), Vec::new());
    let broker = BrokerIngest::new(store.clone(), pipeline, BrokerConfig::default());
    (dir, store, demux, broker)
}

#[tokio::test]
async fn test_same_event_on_both_paths() {
    let (_dir, store, demux, broker) = setup().await;
    let mut live = demux_subscribe(&demux);

    assert_eq!(demux.dispatch(EVENT).await, LineKind::Telemetry);
    let from_broker = match broker.ingest_payload("rtl_433/Oregon-THGR122N/163", EVENT.as_bytes()).await {
        Some(IngestOutcome::Stored(record)) => record,
        other => panic!("Expected stored record, got {other:?}"),
    };

    // At-least-once: two rows, one snapshot entry.
    let snapshot = store.latest_per_source().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0], from_broker);
    assert_eq!(snapshot[0].channel, "1");
    assert_eq!(snapshot[0].humidity, Some(51.0));

    let first = live.recv().await.unwrap();
    let second = live.recv().await.unwrap();
    assert_eq!(first.len(), 1);
    assert!(first[0].id < second[0].id);
    assert_eq!(second[0].id, from_broker.id);
}

#[tokio::test]
async fn test_latest_reflects_most_recent_path() {
    let (_dir, store, demux, broker) = setup().await;

    broker
        .ingest_payload("rtl_433/x", br#"{"id": "A", "temperature_C": 1.0}"#)
        .await;
    demux.dispatch(r#"{"id": "B", "temperature_C": 2.0}"#).await;
    demux.dispatch(r#"{"id": "A", "temperature_C": 3.0}"#).await;

    let snapshot = store.latest_per_source().await.unwrap();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[0].sensor_id, "A");
    assert_eq!(snapshot[0].temperature_c, Some(3.0));
    assert_eq!(snapshot[1].sensor_id, "B");
}

fn demux_subscribe(demux: &StreamDemultiplexer) -> tokio::sync::broadcast::Receiver<etherspy_server::Snapshot> {
    demux.pipeline().broadcaster().subscribe()
}
