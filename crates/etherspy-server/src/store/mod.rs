//! Persistent store abstraction.
//!
//! The ingestion core talks to storage only through these traits:
//! - `TelemetryStore`: append a record, query the Latest Snapshot
//! - `SettingsStore`: read and update the runtime settings map
//! - `AliasStore`: operator-assigned display names per source
//!
//! Two implementations are provided: `SqliteStore` for deployments and
//! `InMemoryStore` for tests and database-less runs. Concurrent inserts are
//! serialized by the store itself, never by callers.

mod memory;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

use etherspy_core::{Configuration, SensorReading, SensorRecord};

/// Errors raised by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database rejected the operation.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An audit payload could not be encoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Creating the database location failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored row could not be decoded.
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// Append-only sensor record storage.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Store a reading. The receipt timestamp is assigned here.
    async fn insert(&self, reading: SensorReading) -> Result<SensorRecord, StoreError>;

    /// For each source identifier, the record with the greatest timestamp
    /// (ties broken by row id), newest first.
    async fn latest_per_source(&self) -> Result<Vec<SensorRecord>, StoreError>;
}

/// Runtime settings storage.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Read the current settings snapshot.
    async fn load_settings(&self) -> Result<Configuration, StoreError>;

    /// Apply updates to keys that already exist, atomically. Unknown keys
    /// are ignored. Returns the number of keys updated.
    async fn update_settings(
        &self,
        updates: &BTreeMap<String, String>,
    ) -> Result<usize, StoreError>;
}

/// Sensor alias storage.
#[async_trait]
pub trait AliasStore: Send + Sync {
    /// All aliases, keyed by source identifier.
    async fn aliases(&self) -> Result<BTreeMap<String, String>, StoreError>;

    /// Set an alias, or remove it when `alias` is `None` or empty.
    async fn set_alias(&self, sensor_id: &str, alias: Option<&str>) -> Result<(), StoreError>;
}
