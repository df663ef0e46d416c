//! # etherspy-core
//!
//! Core EtherSpy data model and ingestion logic.
//!
//! This crate provides:
//! - Runtime settings snapshot (`Configuration`) with defaults
//! - Launch command derivation for the decoding engine
//! - Telemetry normalization into canonical sensor records
//! - In-memory record store and the latest-per-source algorithm
//!
//! This crate is intentionally runtime-agnostic and contains no async code
//! and no I/O, so every rule here can be tested as a pure function.

pub mod command;
pub mod config;
pub mod model;
pub mod normalize;
pub mod store;

pub use command::{normalize_device, CommandBuilder, LaunchSpec, DEFAULT_ENGINE};
pub use config::{BrokerSettings, ConfigError, Configuration};
pub use model::{RawTelemetry, SensorReading, SensorRecord};
pub use normalize::{Normalizer, Rejection};
pub use store::{latest_per_source, MemoryStore};
