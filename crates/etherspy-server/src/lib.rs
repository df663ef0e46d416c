//! # etherspy-server
//!
//! EtherSpy ingestion services on the tokio runtime:
//! - `supervisor`: decoding-engine lifecycle and the restart coordinator
//! - `demux`: engine output line routing
//! - `broker`: MQTT ingestion path
//! - `pipeline`: normalize, store, broadcast
//! - `store`: SQLite and in-memory persistence
//! - `server`: live snapshot WebSocket server

pub mod broadcast;
pub mod broker;
pub mod config;
pub mod demux;
pub mod pipeline;
pub mod server;
pub mod shutdown;
pub mod stats;
pub mod store;
pub mod supervisor;

pub use broadcast::{Broadcaster, Snapshot};
pub use broker::{BrokerConfig, BrokerIngest};
pub use config::{ServiceConfig, ServiceConfigError};
pub use demux::{LineKind, StreamDemultiplexer};
pub use pipeline::{IngestOutcome, IngestPipeline, Origin};
pub use server::{LiveServer, LiveServerConfig};
pub use shutdown::{Shutdown, ShutdownTrigger};
pub use stats::StatisticsCollector;
pub use store::{AliasStore, InMemoryStore, SettingsStore, SqliteStore, StoreError, TelemetryStore};
pub use supervisor::{ProcessSupervisor, RestartHandle, SupervisorConfig, SupervisorState};
