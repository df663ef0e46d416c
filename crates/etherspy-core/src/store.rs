//! EtherSpy record store.
//!
//! The in-memory store keeps every inserted record (append-only) and
//! derives the Latest Snapshot on demand. The same latest-per-source rule is
//! implemented in SQL by the persistent store; `latest_per_source` is the
//! reference both are tested against.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::model::{SensorReading, SensorRecord};

/// Select, for each source identifier, the record with the greatest
/// timestamp. Ties are broken by the greatest row id.
///
/// The result is ordered newest first (timestamp, then row id, descending).
pub fn latest_per_source<'a, I>(records: I) -> Vec<SensorRecord>
where
    I: IntoIterator<Item = &'a SensorRecord>,
{
    let mut latest: HashMap<&str, &SensorRecord> = HashMap::new();
    for record in records {
        latest
            .entry(record.sensor_id.as_str())
            .and_modify(|current| {
                if (record.timestamp, record.id) > (current.timestamp, current.id) {
                    *current = record;
                }
            })
            .or_insert(record);
    }

    let mut snapshot: Vec<SensorRecord> = latest.into_values().cloned().collect();
    snapshot.sort_by(|a, b| (b.timestamp, b.id).cmp(&(a.timestamp, a.id)));
    snapshot
}

/// In-memory, append-only record store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Vec<SensorRecord>,
    next_id: i64,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            next_id: 1,
        }
    }

    /// Append a reading received at `timestamp`, returning the stored record.
    pub fn insert(&mut self, reading: SensorReading, timestamp: DateTime<Utc>) -> SensorRecord {
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        let record = SensorRecord::from_reading(id, reading, timestamp);
        self.records.push(record.clone());
        record
    }

    /// The Latest Snapshot.
    pub fn latest_per_source(&self) -> Vec<SensorRecord> {
        latest_per_source(&self.records)
    }

    /// All records in insertion order.
    pub fn records(&self) -> &[SensorRecord] {
        &self.records
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
