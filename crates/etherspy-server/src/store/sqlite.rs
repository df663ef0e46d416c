//! SQLite-backed store.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use etherspy_core::{Configuration, SensorReading, SensorRecord};

use super::{AliasStore, SettingsStore, StoreError, TelemetryStore};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS sensors_data (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        sensor_id TEXT NOT NULL,
        brand TEXT,
        model TEXT,
        channel TEXT,
        battery_ok INTEGER NOT NULL DEFAULT 0,
        temperature_c REAL,
        humidity REAL,
        raw_json TEXT,
        timestamp TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT
    )",
    "CREATE TABLE IF NOT EXISTS sensor_aliases (
        sensor_id TEXT PRIMARY KEY,
        alias TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_sensor_time ON sensors_data (sensor_id, timestamp)",
];

const LATEST_PER_SOURCE: &str = "
    SELECT s.id, s.sensor_id, s.brand, s.model, s.channel, s.battery_ok,
           s.temperature_c, s.humidity, s.raw_json, s.timestamp
    FROM sensors_data s
    WHERE s.id = (
        SELECT s2.id FROM sensors_data s2
        WHERE s2.sensor_id = s.sensor_id
        ORDER BY s2.timestamp DESC, s2.id DESC
        LIMIT 1
    )
    ORDER BY s.timestamp DESC, s.id DESC";

/// Receipt timestamps are stored as fixed-width UTC text so that text order
/// is time order.
fn encode_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_timestamp(text: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {text:?}: {e}")))
}

fn record_from_row(row: &SqliteRow) -> Result<SensorRecord, StoreError> {
    let timestamp: String = row.try_get("timestamp")?;
    Ok(SensorRecord {
        id: row.try_get("id")?,
        sensor_id: row.try_get("sensor_id")?,
        brand: row.try_get::<Option<String>, _>("brand")?.unwrap_or_default(),
        model: row.try_get::<Option<String>, _>("model")?.unwrap_or_default(),
        channel: row.try_get::<Option<String>, _>("channel")?.unwrap_or_default(),
        battery_ok: row.try_get("battery_ok")?,
        temperature_c: row.try_get("temperature_c")?,
        humidity: row.try_get("humidity")?,
        raw_json: row
            .try_get::<Option<String>, _>("raw_json")?
            .unwrap_or_else(|| "{}".to_string()),
        timestamp: decode_timestamp(&timestamp)?,
    })
}

/// Persistent store on a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`, bootstrap the
    /// schema and seed any missing settings from `defaults`.
    pub async fn open(path: impl AsRef<Path>, defaults: &Configuration) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.bootstrap(defaults).await?;
        info!("Opened database at {}", path.display());
        Ok(store)
    }

    /// Wrap an existing pool. The schema is bootstrapped.
    pub async fn from_pool(pool: SqlitePool, defaults: &Configuration) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.bootstrap(defaults).await?;
        Ok(store)
    }

    async fn bootstrap(&self, defaults: &Configuration) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        let mut tx = self.pool.begin().await?;
        for (key, value) in defaults.iter() {
            sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        debug!("Schema ready, {} default settings checked", defaults.len());
        Ok(())
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl TelemetryStore for SqliteStore {
    async fn insert(&self, reading: SensorReading) -> Result<SensorRecord, StoreError> {
        let timestamp = Utc::now();
        let raw_json = serde_json::Value::Object(reading.raw.clone()).to_string();

        let result = sqlx::query(
            "INSERT INTO sensors_data
                (sensor_id, brand, model, channel, battery_ok, temperature_c, humidity, raw_json, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&reading.sensor_id)
        .bind(&reading.brand)
        .bind(&reading.model)
        .bind(&reading.channel)
        .bind(reading.battery_ok)
        .bind(reading.temperature_c)
        .bind(reading.humidity)
        .bind(&raw_json)
        .bind(encode_timestamp(&timestamp))
        .execute(&self.pool)
        .await?;

        // Read back through the same encoding the query path uses.
        let stored = decode_timestamp(&encode_timestamp(&timestamp))?;
        Ok(SensorRecord::from_reading(result.last_insert_rowid(), reading, stored))
    }

    async fn latest_per_source(&self) -> Result<Vec<SensorRecord>, StoreError> {
        let rows = sqlx::query(LATEST_PER_SOURCE).fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }
}

#[async_trait]
impl SettingsStore for SqliteStore {
    async fn load_settings(&self) -> Result<Configuration, StoreError> {
        let rows = sqlx::query("SELECT key, value FROM settings")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let key: String = row.try_get("key")?;
                let value: Option<String> = row.try_get("value")?;
                Ok((key, value.unwrap_or_default()))
            })
            .collect()
    }

    async fn update_settings(
        &self,
        updates: &BTreeMap<String, String>,
    ) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut updated = 0;
        for (key, value) in updates {
            let result = sqlx::query("UPDATE settings SET value = ? WHERE key = ?")
                .bind(value)
                .bind(key)
                .execute(&mut *tx)
                .await?;
            updated += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(updated)
    }
}

#[async_trait]
impl AliasStore for SqliteStore {
    async fn aliases(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let rows = sqlx::query("SELECT sensor_id, alias FROM sensor_aliases")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let sensor_id: String = row.try_get("sensor_id")?;
                let alias: Option<String> = row.try_get("alias")?;
                Ok((sensor_id, alias.unwrap_or_default()))
            })
            .collect()
    }

    async fn set_alias(&self, sensor_id: &str, alias: Option<&str>) -> Result<(), StoreError> {
        match alias.filter(|a| !a.is_empty()) {
            Some(alias) => {
                sqlx::query("INSERT OR REPLACE INTO sensor_aliases (sensor_id, alias) VALUES (?, ?)")
                    .bind(sensor_id)
                    .bind(alias)
                    .execute(&self.pool)
                    .await?;
            }
            None => {
                sqlx::query("DELETE FROM sensor_aliases WHERE sensor_id = ?")
                    .bind(sensor_id)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }
}
