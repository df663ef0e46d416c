//! Protocol message types for the live WebSocket stream.
//!
//! - Server → Client: `hello` on connect, `new_data` with the full Latest
//!   Snapshot after every stored record
//! - Client → Server: `{"request": "snapshot"}` to re-send the snapshot
//!
//! Messages are serialized as JSON over WebSocket text frames.

use serde::{Deserialize, Serialize};
use etherspy_core::SensorRecord;

// ============================================================================
// Hello Message (Server → Client on connect)
// ============================================================================

/// Hello message sent by server immediately on WebSocket connection.
///
/// # Example
/// ```json
/// {
///   "event": "hello",
///   "data": {
///     "name": "etherspy",
///     "version": "0.1.0",
///     "timestamp": "2024-01-17T10:30:00.000Z"
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloMessage {
    /// Server name identifier.
    pub name: String,

    /// Server version.
    pub version: String,

    /// Current server timestamp in ISO 8601 format.
    pub timestamp: String,
}

impl HelloMessage {
    /// Create a new Hello message.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        }
    }
}

// ============================================================================
// Unified Message Enums
// ============================================================================

/// Messages that can be sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Hello message sent on connection.
    Hello(HelloMessage),

    /// The Latest Snapshot: one record per source, newest first.
    NewData(Vec<SensorRecord>),
}

/// Messages that can be received from client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask for the current snapshot.
    Snapshot,
}

// ============================================================================
// Statistics
// ============================================================================

/// Ingestion counters, as served by `/api/stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestStatistics {
    /// Records stored.
    pub accepted: u64,

    /// Payloads without a source identifier.
    pub rejected: u64,

    /// Payloads that were not JSON objects.
    pub malformed: u64,

    /// Inserts or snapshot queries that failed.
    pub store_failures: u64,

    /// Engine output lines treated as diagnostics.
    pub diagnostic_lines: u64,

    /// Engine instances launched.
    pub engine_launches: u64,

    /// Engine exits with non-zero status, plus spawn failures.
    pub engine_crashes: u64,

    /// Messages received from the broker.
    pub broker_messages: u64,

    /// Connected live stream clients.
    pub live_clients: usize,

    /// Uptime in seconds.
    pub uptime: u64,
}
