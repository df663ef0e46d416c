//! EtherSpy data model types.
//!
//! - `RawTelemetry`: the loosely-typed map decoded from engine output or a
//!   broker payload. It never travels past the normalizer.
//! - `SensorReading`: a normalized, storage-ready reading without a receipt
//!   time.
//! - `SensorRecord`: a stored row, as returned by latest-per-source queries
//!   and pushed to live subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Decoded telemetry as it arrives: field name to JSON value.
pub type RawTelemetry = Map<String, Value>;

/// Canonical sensor reading produced by the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Source identifier (from `id`, else `sensor_id`).
    pub sensor_id: String,
    pub brand: String,
    pub model: String,
    pub channel: String,
    pub battery_ok: bool,
    /// Temperature in Celsius.
    pub temperature_c: Option<f64>,
    /// Relative humidity.
    pub humidity: Option<f64>,
    /// The full (possibly augmented) payload, kept for audit.
    pub raw: RawTelemetry,
}

/// A stored sensor record.
///
/// Serializes to the same flat row shape the dashboard consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    /// Row id, assigned by the store in insertion order.
    pub id: i64,
    pub sensor_id: String,
    pub brand: String,
    pub model: String,
    pub channel: String,
    pub battery_ok: bool,
    pub temperature_c: Option<f64>,
    pub humidity: Option<f64>,
    /// Audit payload, JSON-encoded.
    pub raw_json: String,
    /// Receipt time, assigned at insertion.
    pub timestamp: DateTime<Utc>,
}

impl SensorRecord {
    /// Build the stored form of a reading.
    pub fn from_reading(id: i64, reading: SensorReading, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            raw_json: Value::Object(reading.raw).to_string(),
            sensor_id: reading.sensor_id,
            brand: reading.brand,
            model: reading.model,
            channel: reading.channel,
            battery_ok: reading.battery_ok,
            temperature_c: reading.temperature_c,
            humidity: reading.humidity,
            timestamp,
        }
    }

    /// Decode the audit payload.
    pub fn raw(&self) -> Option<RawTelemetry> {
        match serde_json::from_str(&self.raw_json) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        }
    }
}
