//! Runtime settings snapshot.
//!
//! EtherSpy keeps its operator-editable settings as a flat string map
//! (persisted by the server crate). This module provides:
//! - The well-known setting keys and their defaults
//! - `Configuration`, an immutable read of the settings at one point in time
//! - Typed accessors used by the command builder, normalizer and broker task
//!
//! Values are kept as strings on purpose: anything the operator typed is
//! passed through to the decoding engine, which reports its own errors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Well-known setting keys.
pub mod keys {
    pub const SDR_FREQ: &str = "sdr_freq";
    pub const SDR_GAIN: &str = "sdr_gain";
    pub const SDR_PROTOCOLS: &str = "sdr_protocols";
    pub const SDR_DEVICE: &str = "sdr_device";
    pub const SDR_SAMPLERATE: &str = "sdr_samplerate";
    pub const SDR_AUTOLEVEL: &str = "sdr_autolevel";
    pub const SDR_NOISE: &str = "sdr_noise";
    pub const SDR_STARRED: &str = "sdr_starred";
    pub const SDR_CELSIUS: &str = "sdr_celsius";
    pub const SDR_STALE_THRESHOLD: &str = "sdr_stale_threshold";
    pub const MQTT_BROKER: &str = "mqtt_broker";
    pub const MQTT_PORT: &str = "mqtt_port";
    pub const MQTT_USER: &str = "mqtt_user";
    pub const MQTT_PASS: &str = "mqtt_pass";
    pub const MQTT_TOPIC: &str = "mqtt_topic";
}

/// Default settings, in bootstrap order.
///
/// Broker entries are placeholders; `Configuration::defaults_with` seeds them
/// from the process environment.
pub const DEFAULTS: &[(&str, &str)] = &[
    (keys::SDR_FREQ, "433.92M"),
    (keys::SDR_GAIN, "auto"),
    (keys::SDR_PROTOCOLS, ""),
    (keys::SDR_DEVICE, ":0"),
    (keys::MQTT_BROKER, "192.168.1.125"),
    (keys::MQTT_PORT, "1883"),
    (keys::MQTT_USER, ""),
    (keys::MQTT_PASS, ""),
    (keys::MQTT_TOPIC, "rtl_433[/model][/id]"),
    (keys::SDR_AUTOLEVEL, "1"),
    (keys::SDR_NOISE, "1"),
    (keys::SDR_STARRED, "0"),
    (keys::SDR_SAMPLERATE, "1024k"),
    (keys::SDR_CELSIUS, "1"),
    (keys::SDR_STALE_THRESHOLD, "60"),
];

/// Environment variables that seed the broker defaults on first start.
const BROKER_SEEDS: &[(&str, &str)] = &[
    (keys::MQTT_BROKER, "MQTT_BROKER"),
    (keys::MQTT_PORT, "MQTT_PORT"),
    (keys::MQTT_USER, "MQTT_USER"),
    (keys::MQTT_PASS, "MQTT_PASS"),
];

const DEFAULT_STALE_THRESHOLD_SECS: u64 = 60;

/// Errors that can occur while interpreting settings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A setting that must be numeric is not.
    #[error("Invalid value for {key}: {value:?}")]
    InvalidNumber { key: &'static str, value: String },
}

/// Look up the built-in default for a key.
pub fn default_for(key: &str) -> Option<&'static str> {
    DEFAULTS.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// An immutable snapshot of the runtime settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration {
    values: BTreeMap<String, String>,
}

impl Configuration {
    /// Create an empty snapshot. Every accessor falls back to its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot containing exactly the built-in defaults.
    pub fn defaults() -> Self {
        Self::defaults_with(|_| None)
    }

    /// Built-in defaults with broker entries seeded from `lookup`
    /// (normally `std::env::var`).
    pub fn defaults_with<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config: Self = DEFAULTS.iter().copied().collect();
        for (key, var) in BROKER_SEEDS {
            if let Some(value) = lookup(var) {
                config.set(*key, value);
            }
        }
        config
    }

    /// Get a raw value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Get a raw value, falling back to the built-in default, then to "".
    pub fn get_or_default(&self, key: &str) -> &str {
        self.get(key)
            .or_else(|| default_for(key))
            .unwrap_or_default()
    }

    /// Set a raw value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Whether the snapshot carries a value for `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Iterate all key/value pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of keys in the snapshot.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Consume the snapshot into its underlying map.
    pub fn into_map(self) -> BTreeMap<String, String> {
        self.values
    }

    /// A flag is enabled iff its value is exactly `"1"`.
    pub fn flag(&self, key: &str) -> bool {
        self.get_or_default(key) == "1"
    }

    // ========================================================================
    // Receiver
    // ========================================================================

    pub fn frequency(&self) -> &str {
        self.get_or_default(keys::SDR_FREQ)
    }

    pub fn gain(&self) -> &str {
        self.get_or_default(keys::SDR_GAIN)
    }

    pub fn device(&self) -> &str {
        self.get_or_default(keys::SDR_DEVICE)
    }

    pub fn sample_rate(&self) -> &str {
        self.get_or_default(keys::SDR_SAMPLERATE)
    }

    pub fn protocols(&self) -> &str {
        self.get_or_default(keys::SDR_PROTOCOLS)
    }

    pub fn auto_level(&self) -> bool {
        self.flag(keys::SDR_AUTOLEVEL)
    }

    pub fn noise_reporting(&self) -> bool {
        self.flag(keys::SDR_NOISE)
    }

    pub fn starred_protocols(&self) -> bool {
        self.flag(keys::SDR_STARRED)
    }

    /// Whether `*_F` fields get a converted `*_C` sibling.
    pub fn celsius_conversion(&self) -> bool {
        self.flag(keys::SDR_CELSIUS)
    }

    /// Age after which a source's latest record is considered stale.
    ///
    /// Unparseable values fall back to 60 seconds.
    pub fn stale_threshold(&self) -> Duration {
        let secs = self
            .get_or_default(keys::SDR_STALE_THRESHOLD)
            .trim()
            .parse()
            .unwrap_or(DEFAULT_STALE_THRESHOLD_SECS);
        Duration::from_secs(secs)
    }

    // ========================================================================
    // Broker
    // ========================================================================

    /// Broker settings, or `None` when no broker address is configured.
    pub fn broker(&self) -> Option<BrokerSettings> {
        let host = self.get_or_default(keys::MQTT_BROKER).trim();
        if host.is_empty() {
            return None;
        }
        let non_empty = |key| {
            let value = self.get_or_default(key);
            (!value.is_empty()).then(|| value.to_string())
        };
        Some(BrokerSettings {
            host: host.to_string(),
            port: self.get_or_default(keys::MQTT_PORT).trim().to_string(),
            user: non_empty(keys::MQTT_USER),
            password: non_empty(keys::MQTT_PASS),
            topic: self.get_or_default(keys::MQTT_TOPIC).to_string(),
        })
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Configuration {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Connection settings for the message broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerSettings {
    pub host: String,
    /// Port as configured. Passed verbatim to the engine; parsed by the
    /// broker client.
    pub port: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Engine topic template, e.g. `rtl_433[/model][/id]`.
    pub topic: String,
}

impl BrokerSettings {
    /// Parse the configured port.
    pub fn port_number(&self) -> Result<u16, ConfigError> {
        self.port.parse().map_err(|_| ConfigError::InvalidNumber {
            key: keys::MQTT_PORT,
            value: self.port.clone(),
        })
    }

    /// `host:port` for log messages.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Wildcard topic filter covering everything the engine publishes.
    ///
    /// Takes the literal prefix of the topic template (up to the first `[`
    /// or `/`) and appends `/#`.
    pub fn subscription_filter(&self) -> String {
        let prefix: String = self
            .topic
            .trim()
            .chars()
            .take_while(|c| *c != '[' && *c != '/')
            .collect();
        if prefix.is_empty() {
            "rtl_433/#".to_string()
        } else {
            format!("{prefix}/#")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_cover_every_key() {
        let config = Configuration::defaults();
        assert_eq!(config.len(), DEFAULTS.len());
        assert_eq!(config.frequency(), "433.92M");
        assert_eq!(config.gain(), "auto");
        assert_eq!(config.device(), ":0");
        assert_eq!(config.sample_rate(), "1024k");
        assert!(config.auto_level());
        assert!(config.noise_reporting());
        assert!(!config.starred_protocols());
        assert!(config.celsius_conversion());
    }

    #[test]
    fn test_empty_snapshot_falls_back_to_defaults() {
        let config = Configuration::new();
        assert_eq!(config.frequency(), "433.92M");
        assert_eq!(config.stale_threshold(), Duration::from_secs(60));
        assert_eq!(config.get_or_default("unknown_key"), "");
    }

    #[test]
    fn test_broker_seeded_from_environment() {
        let config = Configuration::defaults_with(|var| match var {
            "MQTT_BROKER" => Some("mqtt.local".to_string()),
            "MQTT_USER" => Some("sdr".to_string()),
            _ => None,
        });

        let broker = config.broker().unwrap();
        assert_eq!(broker.host, "mqtt.local");
        assert_eq!(broker.port, "1883");
        assert_eq!(broker.user.as_deref(), Some("sdr"));
        assert_eq!(broker.password, None);
    }

    #[test]
    fn test_flags_require_exact_one() {
        let config: Configuration = [
            (keys::SDR_AUTOLEVEL, "true"),
            (keys::SDR_NOISE, "0"),
            (keys::SDR_CELSIUS, "1"),
        ]
        .into_iter()
        .collect();

        assert!(!config.auto_level());
        assert!(!config.noise_reporting());
        assert!(config.celsius_conversion());
    }

    #[test]
    fn test_no_broker_when_address_blank() {
        let config: Configuration = [(keys::MQTT_BROKER, "  ")].into_iter().collect();
        assert!(config.broker().is_none());
    }

    #[test]
    fn test_stale_threshold_parsing() {
        let config: Configuration = [(keys::SDR_STALE_THRESHOLD, "300")].into_iter().collect();
        assert_eq!(config.stale_threshold(), Duration::from_secs(300));

        let config: Configuration = [(keys::SDR_STALE_THRESHOLD, "soon")].into_iter().collect();
        assert_eq!(config.stale_threshold(), Duration::from_secs(60));
    }

    #[test]
    fn test_port_number() {
        let mut broker = Configuration::defaults().broker().unwrap();
        assert_eq!(broker.port_number(), Ok(1883));

        broker.port = "eighteen".to_string();
        assert!(matches!(
            broker.port_number(),
            Err(ConfigError::InvalidNumber { key: "mqtt_port", .. })
        ));
    }

    #[test]
    fn test_subscription_filter_from_template() {
        let mut broker = Configuration::defaults().broker().unwrap();
        assert_eq!(broker.subscription_filter(), "rtl_433/#");

        broker.topic = "sensors/433/[model]".to_string();
        assert_eq!(broker.subscription_filter(), "sensors/#");

        broker.topic = "[model][/id]".to_string();
        assert_eq!(broker.subscription_filter(), "rtl_433/#");
    }
}
