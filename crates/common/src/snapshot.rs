use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Record;

/// A complete, point-in-time read of the users collection.
///
/// Snapshots are immutable and superseded wholesale by the next fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Records in store order.
    pub records: Vec<Record>,
    /// When the snapshot was taken.
    pub fetched_at: DateTime<Utc>,
}

impl Snapshot {
    /// Creates a snapshot stamped with the current time.
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records,
            fetched_at: Utc::now(),
        }
    }

    /// Number of records in the snapshot.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the collection was empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<Record> for Snapshot {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
