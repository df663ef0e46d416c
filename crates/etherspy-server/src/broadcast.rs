//! Live snapshot fan-out.
//!
//! Every stored record produces a fresh Latest Snapshot which is published
//! to all connected live clients. A slow client that falls behind the
//! channel capacity skips ahead to newer snapshots; it never blocks
//! ingestion.

use std::sync::Arc;
use tokio::sync::broadcast;

use etherspy_core::SensorRecord;

/// A published Latest Snapshot, shared between all subscribers.
pub type Snapshot = Arc<Vec<SensorRecord>>;

const DEFAULT_CAPACITY: usize = 64;

/// Broadcasts snapshots to live clients.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<Snapshot>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish a snapshot. Returns the number of receivers it reached;
    /// zero when nobody is listening.
    pub fn publish(&self, snapshot: Vec<SensorRecord>) -> usize {
        self.tx.send(Arc::new(snapshot)).unwrap_or(0)
    }

    /// Subscribe to future snapshots.
    pub fn subscribe(&self) -> broadcast::Receiver<Snapshot> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_receivers() {
        let broadcaster = Broadcaster::new();
        assert_eq!(broadcaster.publish(Vec::new()), 0);
    }

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let broadcaster = Broadcaster::new();
        let mut a = broadcaster.subscribe();
        let mut b = broadcaster.subscribe();
        assert_eq!(broadcaster.receiver_count(), 2);

        assert_eq!(broadcaster.publish(Vec::new()), 2);
        assert!(a.recv().await.unwrap().is_empty());
        assert!(b.recv().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags() {
        let broadcaster = Broadcaster::with_capacity(2);
        let mut rx = broadcaster.subscribe();
        for _ in 0..5 {
            broadcaster.publish(Vec::new());
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        assert!(rx.recv().await.is_ok());
    }
}
