//! The persistence interface the pipeline requires.
//!
//! Every operation is independently transactional. Callers never assume
//! atomicity across two calls: a crash between a dedup delete and the
//! following upsert loses at most the newest report.

use chrono::{DateTime, Utc};

use crate::model::{GridPoint, HistoryRecord, RecordId};

/// Errors raised by a history store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying SQLite call failed (including busy timeouts).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored row could not be converted back into a record.
    #[error("corrupt history row {id}: {reason}")]
    CorruptRow { id: i64, reason: String },

    /// The report has no position and cannot become a record.
    #[error("report from {0} has no position to store")]
    MissingPosition(String),

    /// The store is unavailable for a reason outside SQLite.
    #[error("history store unavailable: {0}")]
    Unavailable(String),
}

/// Durable, keyed storage of [`HistoryRecord`]s ordered per station by
/// arrival time.
pub trait HistoryStore {
    /// The most recent record of `station_id` that arrived strictly after
    /// `since` and whose rounded position lies within `tolerance_e6`
    /// micro-degrees of `point` on both axes.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn find_recent_match(
        &self,
        station_id: &str,
        since: DateTime<Utc>,
        point: GridPoint,
        tolerance_e6: u32,
    ) -> Result<Option<RecordId>, StoreError>;

    /// Rounded position of the station's most recent record.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn find_latest_position(&self, station_id: &str) -> Result<Option<GridPoint>, StoreError>;

    /// Delete one record. Deleting a missing record is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn delete_record(&self, id: RecordId) -> Result<(), StoreError>;

    /// Insert `record`, overwriting every field of an existing row with the
    /// same `(station_id, arrival_at)` key.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails; nothing is left half-written.
    fn upsert_record(&self, record: &HistoryRecord) -> Result<(), StoreError>;

    /// Delete every record of `station_id` strictly older than its `k`-th
    /// most recent one. Returns the number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup or delete fails.
    fn delete_older_than_kth(&self, station_id: &str, k: usize) -> Result<usize, StoreError>;

    /// Every station that currently has at least one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn stations(&self) -> Result<Vec<String>, StoreError>;
}

impl<S: HistoryStore + ?Sized> HistoryStore for &S {
    fn find_recent_match(
        &self,
        station_id: &str,
        since: DateTime<Utc>,
        point: GridPoint,
        tolerance_e6: u32,
    ) -> Result<Option<RecordId>, StoreError> {
        (**self).find_recent_match(station_id, since, point, tolerance_e6)
    }

    fn find_latest_position(&self, station_id: &str) -> Result<Option<GridPoint>, StoreError> {
        (**self).find_latest_position(station_id)
    }

    fn delete_record(&self, id: RecordId) -> Result<(), StoreError> {
        (**self).delete_record(id)
    }

    fn upsert_record(&self, record: &HistoryRecord) -> Result<(), StoreError> {
        (**self).upsert_record(record)
    }

    fn delete_older_than_kth(&self, station_id: &str, k: usize) -> Result<usize, StoreError> {
        (**self).delete_older_than_kth(station_id, k)
    }

    fn stations(&self) -> Result<Vec<String>, StoreError> {
        (**self).stations()
    }
}
