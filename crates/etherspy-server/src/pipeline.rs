//! The canonical ingestion chain.
//!
//! Both ingestion paths (engine output and broker messages) feed the same
//! pipeline: normalize, insert, re-derive the Latest Snapshot, broadcast.
//! No failure here propagates to the caller; every outcome is counted and
//! the caller moves on to its next line or message.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, trace};

use etherspy_core::{Normalizer, RawTelemetry, Rejection, SensorRecord};

use crate::broadcast::Broadcaster;
use crate::stats::StatisticsCollector;
use crate::store::{SettingsStore, StoreError, TelemetryStore};

/// Which ingestion path a payload arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Engine,
    Broker,
}

/// Result of ingesting one payload.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Stored and broadcast.
    Stored(SensorRecord),
    /// Dropped by the normalizer.
    Rejected(Rejection),
    /// The insert failed; the record is lost.
    StoreFailed,
}

/// Shared handle to the ingestion chain. Cheap to clone.
#[derive(Clone)]
pub struct IngestPipeline {
    records: Arc<dyn TelemetryStore>,
    settings: Arc<dyn SettingsStore>,
    broadcaster: Broadcaster,
    stats: Arc<StatisticsCollector>,
    /// Held around snapshot query and publish so snapshots go out in query order.
    publish: Arc<Mutex<()>>,
}

impl IngestPipeline {
    pub fn new(
        records: Arc<dyn TelemetryStore>,
        settings: Arc<dyn SettingsStore>,
        broadcaster: Broadcaster,
        stats: Arc<StatisticsCollector>,
    ) -> Self {
        Self {
            records,
            settings,
            broadcaster,
            stats,
            publish: Arc::new(Mutex::new(())),
        }
    }

    /// Ingest any decoded JSON value.
    pub async fn ingest(&self, value: Value, origin: Origin) -> IngestOutcome {
        match value {
            Value::Object(map) => self.ingest_map(map, origin).await,
            _ => {
                trace!(?origin, "Dropping non-object payload");
                self.stats.record_malformed();
                IngestOutcome::Rejected(Rejection::NotAnObject)
            }
        }
    }

    /// Ingest a telemetry map.
    pub async fn ingest_map(&self, raw: RawTelemetry, origin: Origin) -> IngestOutcome {
        let normalizer = Normalizer::new(self.celsius_conversion().await);
        let reading = match normalizer.normalize(raw) {
            Ok(reading) => reading,
            Err(rejection) => {
                trace!(?origin, %rejection, "Dropping telemetry");
                match rejection {
                    Rejection::NotAnObject => self.stats.record_malformed(),
                    Rejection::MissingSourceId => self.stats.record_rejected(),
                }
                return IngestOutcome::Rejected(rejection);
            }
        };

        let sensor_id = reading.sensor_id.clone();
        let record = match self.records.insert(reading).await {
            Ok(record) => record,
            Err(e) => {
                error!(%sensor_id, ?origin, "Failed to store record: {}", e);
                self.stats.record_store_failure();
                return IngestOutcome::StoreFailed;
            }
        };
        self.stats.record_accepted();
        trace!(%sensor_id, id = record.id, ?origin, "Stored record");

        self.publish_latest().await;
        IngestOutcome::Stored(record)
    }

    /// Re-derive the Latest Snapshot and broadcast it. The insert itself
    /// stays outside the lock.
    async fn publish_latest(&self) {
        let _order = self.publish.lock().await;
        match self.records.latest_per_source().await {
            Ok(snapshot) => {
                self.broadcaster.publish(snapshot);
            }
            Err(e) => {
                error!("Failed to query latest snapshot: {}", e);
                self.stats.record_store_failure();
            }
        }
    }

    /// The current Latest Snapshot.
    pub async fn latest(&self) -> Result<Vec<SensorRecord>, StoreError> {
        self.records.latest_per_source().await
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn stats(&self) -> &Arc<StatisticsCollector> {
        &self.stats
    }

    /// Read per record so a settings change applies to the very next
    /// payload. Falls back to converting when settings are unreadable.
    async fn celsius_conversion(&self) -> bool {
        match self.settings.load_settings().await {
            Ok(settings) => settings.celsius_conversion(),
            Err(e) => {
                error!("Failed to load settings: {}", e);
                true
            }
        }
    }
}
