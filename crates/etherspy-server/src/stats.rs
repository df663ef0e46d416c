//! Ingestion statistics.
//!
//! Counters are updated from the supervisor, the broker task, the pipeline
//! and the live server without locking, and read as an `IngestStatistics`
//! snapshot by the REST layer.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use etherspy_protocol::IngestStatistics;

/// Collects ingestion counters.
pub struct StatisticsCollector {
    start_time: Instant,
    accepted: AtomicU64,
    rejected: AtomicU64,
    malformed: AtomicU64,
    store_failures: AtomicU64,
    diagnostic_lines: AtomicU64,
    engine_launches: AtomicU64,
    engine_crashes: AtomicU64,
    broker_messages: AtomicU64,
    live_clients: AtomicUsize,
}

impl StatisticsCollector {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            store_failures: AtomicU64::new(0),
            diagnostic_lines: AtomicU64::new(0),
            engine_launches: AtomicU64::new(0),
            engine_crashes: AtomicU64::new(0),
            broker_messages: AtomicU64::new(0),
            live_clients: AtomicUsize::new(0),
        }
    }

    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_diagnostic(&self) {
        self.diagnostic_lines.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_launch(&self) {
        self.engine_launches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_crash(&self) {
        self.engine_crashes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_broker_message(&self) {
        self.broker_messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of engine instances launched so far.
    pub fn launches(&self) -> u64 {
        self.engine_launches.load(Ordering::Relaxed)
    }

    /// Increment live client count.
    pub fn client_connected(&self) {
        self.live_clients.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement live client count.
    pub fn client_disconnected(&self) {
        // Saturating: a stray disconnect must not wrap the counter.
        let _ = self
            .live_clients
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Get current statistics snapshot.
    pub fn snapshot(&self) -> IngestStatistics {
        IngestStatistics {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            diagnostic_lines: self.diagnostic_lines.load(Ordering::Relaxed),
            engine_launches: self.engine_launches.load(Ordering::Relaxed),
            engine_crashes: self.engine_crashes.load(Ordering::Relaxed),
            broker_messages: self.broker_messages.load(Ordering::Relaxed),
            live_clients: self.live_clients.load(Ordering::Relaxed),
            uptime: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for StatisticsCollector {
    fn default() -> Self {
        Self::new()
    }
}
