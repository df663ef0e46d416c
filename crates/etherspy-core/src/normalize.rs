//! Telemetry normalization.
//!
//! Projects the loosely-typed telemetry map into a `SensorReading`:
//! - Source identifier from `id`, else `sensor_id`. A present `0` counts;
//!   only absent or `null` values are missing.
//! - `brand`/`model`/`channel` default to `Generic`/`Unknown`/`0`.
//! - Battery-ok is true only for `"OK"`, `1` or `true`.
//! - Numeric fields parse defensively; anything unparseable is unknown.
//! - With Celsius conversion on, every `*_F` field gets a `*_C` sibling
//!   unless that sibling already carries a non-null value.

use serde_json::Value;
use thiserror::Error;

use crate::model::{RawTelemetry, SensorReading};

/// Why a payload did not produce a reading.
///
/// Rejections are expected noise (control messages, partial decodes) and
/// are dropped silently by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    /// The payload was valid JSON but not an object.
    #[error("payload is not an object")]
    NotAnObject,
    /// Neither `id` nor `sensor_id` was present.
    #[error("no source identifier")]
    MissingSourceId,
}

/// Normalizes raw telemetry into canonical readings.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    celsius_conversion: bool,
}

impl Normalizer {
    /// Create a normalizer. `celsius_conversion` mirrors the `sdr_celsius`
    /// setting.
    pub fn new(celsius_conversion: bool) -> Self {
        Self { celsius_conversion }
    }

    /// Normalize any decoded JSON value.
    pub fn normalize_value(&self, value: Value) -> Result<SensorReading, Rejection> {
        match value {
            Value::Object(map) => self.normalize(map),
            _ => Err(Rejection::NotAnObject),
        }
    }

    /// Normalize a telemetry map.
    pub fn normalize(&self, mut raw: RawTelemetry) -> Result<SensorReading, Rejection> {
        let sensor_id = present(&raw, "id")
            .or_else(|| present(&raw, "sensor_id"))
            .map(scalar_to_string)
            .ok_or(Rejection::MissingSourceId)?;

        if self.celsius_conversion {
            convert_fahrenheit_fields(&mut raw);
        }

        let text_or = |key: &str, default: &str| {
            present(&raw, key)
                .map(scalar_to_string)
                .unwrap_or_else(|| default.to_string())
        };

        Ok(SensorReading {
            sensor_id,
            brand: text_or("brand", "Generic"),
            model: text_or("model", "Unknown"),
            channel: text_or("channel", "0"),
            battery_ok: battery_ok(raw.get("battery_ok")),
            temperature_c: raw.get("temperature_C").and_then(parse_number),
            humidity: raw.get("humidity").and_then(parse_number),
            raw,
        })
    }
}

/// A field that is present and not `null`.
fn present<'a>(raw: &'a RawTelemetry, key: &str) -> Option<&'a Value> {
    raw.get(key).filter(|v| !v.is_null())
}

/// Render a scalar the way it appears on the wire (`7`, `"A"` → `A`).
fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Battery-ok coercion: exactly `"OK"`, `1` or `true`.
pub fn battery_ok(value: Option<&Value>) -> bool {
    match value {
        Some(Value::String(s)) => s == "OK",
        Some(Value::Number(n)) => n.as_f64() == Some(1.0),
        Some(Value::Bool(b)) => *b,
        _ => false,
    }
}

/// Parse a numeric field. Numbers and numeric strings parse; everything
/// else, including non-finite values, is unknown.
pub fn parse_number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

/// `(F - 32) * 5/9`, rounded to two decimals.
pub fn fahrenheit_to_celsius(fahrenheit: f64) -> f64 {
    ((fahrenheit - 32.0) * 5.0 / 9.0 * 100.0).round() / 100.0
}

/// Add a `*_C` sibling for every parseable `*_F` field whose sibling is
/// absent or `null`. Existing Celsius values are never overwritten.
pub fn convert_fahrenheit_fields(raw: &mut RawTelemetry) {
    let conversions: Vec<(String, f64)> = raw
        .iter()
        .filter_map(|(key, value)| {
            let stem = key.strip_suffix("_F")?;
            let fahrenheit = parse_number(value)?;
            let celsius_key = format!("{stem}_C");
            present(raw, &celsius_key)
                .is_none()
                .then(|| (celsius_key, fahrenheit_to_celsius(fahrenheit)))
        })
        .collect();

    for (key, celsius) in conversions {
        if let Some(number) = serde_json::Number::from_f64(celsius) {
            raw.insert(key, Value::Number(number));
        }
    }
}
