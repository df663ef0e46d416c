//! In-memory store for tests and database-less runs.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use etherspy_core::{Configuration, MemoryStore, SensorReading, SensorRecord};

use super::{AliasStore, SettingsStore, StoreError, TelemetryStore};

/// Store that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: RwLock<MemoryStore>,
    settings: RwLock<Configuration>,
    aliases: RwLock<BTreeMap<String, String>>,
}

impl InMemoryStore {
    /// Create a store seeded with the default settings.
    pub fn new() -> Self {
        Self::with_settings(Configuration::defaults())
    }

    /// Create a store seeded with the given settings.
    pub fn with_settings(settings: Configuration) -> Self {
        Self {
            records: RwLock::new(MemoryStore::new()),
            settings: RwLock::new(settings),
            aliases: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether no records are stored.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// All records in insertion order.
    pub async fn records(&self) -> Vec<SensorRecord> {
        self.records.read().await.records().to_vec()
    }
}

#[async_trait]
impl TelemetryStore for InMemoryStore {
    async fn insert(&self, reading: SensorReading) -> Result<SensorRecord, StoreError> {
        let mut records = self.records.write().await;
        Ok(records.insert(reading, Utc::now()))
    }

    async fn latest_per_source(&self) -> Result<Vec<SensorRecord>, StoreError> {
        Ok(self.records.read().await.latest_per_source())
    }
}

#[async_trait]
impl SettingsStore for InMemoryStore {
    async fn load_settings(&self) -> Result<Configuration, StoreError> {
        Ok(self.settings.read().await.clone())
    }

    async fn update_settings(
        &self,
        updates: &BTreeMap<String, String>,
    ) -> Result<usize, StoreError> {
        let mut settings = self.settings.write().await;
        let mut updated = 0;
        for (key, value) in updates {
            if settings.contains_key(key) {
                settings.set(key.clone(), value.clone());
                updated += 1;
            }
        }
        Ok(updated)
    }
}

#[async_trait]
impl AliasStore for InMemoryStore {
    async fn aliases(&self) -> Result<BTreeMap<String, String>, StoreError> {
        Ok(self.aliases.read().await.clone())
    }

    async fn set_alias(&self, sensor_id: &str, alias: Option<&str>) -> Result<(), StoreError> {
        let mut aliases = self.aliases.write().await;
        match alias.filter(|a| !a.is_empty()) {
            Some(alias) => {
                aliases.insert(sensor_id.to_string(), alias.to_string());
            }
            None => {
                aliases.remove(sensor_id);
            }
        }
        Ok(())
    }
}
