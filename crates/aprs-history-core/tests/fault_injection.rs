//! Fault-injection tests for the per-report path.
//!
//! A wrapper store fails selected operations on demand. None of these
//! failures may stop the pipeline:
//! - failed dedup and replay lookups fall back to a fresh insert
//! - a failed duplicate delete still stores the new report
//! - a failed upsert drops that report only
//! - failed trims are retried after the interval

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use aprs_history_core::clock::ManualClock;
use aprs_history_core::config::{FilterConfig, RetentionDepth, RetentionPolicy};
use aprs_history_core::db::SqliteHistoryStore;
use aprs_history_core::model::{GridPoint, HistoryRecord, PositionReport, RecordId};
use aprs_history_core::pipeline::{IngestStats, Outcome, Tracker};
use aprs_history_core::retention::RetentionTrimmer;
use aprs_history_core::store::{HistoryStore, StoreError};
use chrono::{DateTime, Utc};

#[derive(Default)]
struct Faults {
    reads: AtomicBool,
    deletes: AtomicBool,
    upserts: AtomicBool,
    trims: AtomicBool,
    trim_calls: AtomicUsize,
}

struct FlakyStore {
    inner: SqliteHistoryStore,
    faults: Arc<Faults>,
}

fn injected(what: &str) -> StoreError {
    StoreError::Unavailable(format!("injected {what} failure"))
}

impl HistoryStore for FlakyStore {
    fn find_recent_match(
        &self,
        station_id: &str,
        since: DateTime<Utc>,
        point: GridPoint,
        tolerance_e6: u32,
    ) -> Result<Option<RecordId>, StoreError> {
        if self.faults.reads.load(Ordering::SeqCst) {
            return Err(injected("read"));
        }
        self.inner
            .find_recent_match(station_id, since, point, tolerance_e6)
    }

    fn find_latest_position(&self, station_id: &str) -> Result<Option<GridPoint>, StoreError> {
        if self.faults.reads.load(Ordering::SeqCst) {
            return Err(injected("read"));
        }
        self.inner.find_latest_position(station_id)
    }

    fn delete_record(&self, id: RecordId) -> Result<(), StoreError> {
        if self.faults.deletes.load(Ordering::SeqCst) {
            return Err(injected("delete"));
        }
        self.inner.delete_record(id)
    }

    fn upsert_record(&self, record: &HistoryRecord) -> Result<(), StoreError> {
        if self.faults.upserts.load(Ordering::SeqCst) {
            return Err(injected("upsert"));
        }
        self.inner.upsert_record(record)
    }

    fn delete_older_than_kth(&self, station_id: &str, k: usize) -> Result<usize, StoreError> {
        self.faults.trim_calls.fetch_add(1, Ordering::SeqCst);
        if self.faults.trims.load(Ordering::SeqCst) {
            return Err(injected("trim"));
        }
        self.inner.delete_older_than_kth(station_id, k)
    }

    fn stations(&self) -> Result<Vec<String>, StoreError> {
        self.inner.stations()
    }
}

struct Harness {
    tracker: Tracker<FlakyStore, ManualClock>,
    clock: Arc<ManualClock>,
    faults: Arc<Faults>,
}

impl Harness {
    fn new(filter: FilterConfig, keep: usize) -> Self {
        let clock = Arc::new(ManualClock::starting_at(
            DateTime::from_timestamp(1_708_012_200, 0).expect("valid ts"),
        ));
        let policy = RetentionPolicy {
            depth: std::num::NonZeroUsize::new(keep).map_or(RetentionDepth::Unlimited, RetentionDepth::Keep),
            interval: Duration::from_secs(60),
        };
        let trimmer = Arc::new(RetentionTrimmer::new(policy, clock.clone()));
        let faults = Arc::new(Faults::default());
        let store = FlakyStore {
            inner: SqliteHistoryStore::in_memory().expect("store"),
            faults: faults.clone(),
        };
        Self {
            tracker: Tracker::new(store, clock.clone(), Arc::new(filter), trimmer),
            clock,
            faults,
        }
    }

    fn rows(&self) -> usize {
        self.tracker.store().inner.count_records().expect("count")
    }
}

fn report() -> PositionReport {
    PositionReport::new("KD2ABC")
        .via(["qAR", "N0CALL"])
        .at(40.0, -75.0)
        .with_altitude(100.0)
}

#[test]
fn failed_lookups_fall_back_to_insert() {
    let mut filter = FilterConfig::default();
    filter.strict_replay_tags.insert("qAR".into());
    let h = Harness::new(filter, 100);

    h.tracker.process(&report());
    h.clock.advance(Duration::from_secs(60));
    h.faults.reads.store(true, Ordering::SeqCst);

    // Both the replay check and the dedup lookup fail; the report is stored.
    assert_eq!(h.tracker.process(&report()), Outcome::Stored { replaced: false });
    assert_eq!(h.rows(), 2);
}

#[test]
fn failed_duplicate_delete_still_stores() {
    let h = Harness::new(FilterConfig::default(), 100);
    h.tracker.process(&report());
    h.clock.advance(Duration::from_secs(60));
    h.faults.deletes.store(true, Ordering::SeqCst);

    assert_eq!(h.tracker.process(&report()), Outcome::Stored { replaced: false });
    assert_eq!(h.rows(), 2);
}

#[test]
fn write_failure_drops_only_that_report() {
    let h = Harness::new(FilterConfig::default(), 100);
    let mut stats = IngestStats::default();

    h.faults.upserts.store(true, Ordering::SeqCst);
    stats.record(h.tracker.process(&report()));
    h.faults.upserts.store(false, Ordering::SeqCst);

    h.clock.advance(Duration::from_secs(1));
    stats.record(h.tracker.process(&report().at(41.0, -75.0)));

    assert_eq!(stats.write_failures, 1);
    assert_eq!(stats.stored, 1);
    assert_eq!(h.rows(), 1);
}

#[test]
fn trim_failures_are_retried_after_interval() {
    let h = Harness::new(FilterConfig::default(), 1);
    for n in 0..3 {
        h.tracker.process(&report().at(40.0 + f64::from(n), -75.0));
        h.clock.advance(Duration::from_secs(1));
    }
    assert_eq!(h.rows(), 3);

    h.faults.trims.store(true, Ordering::SeqCst);
    h.clock.advance(Duration::from_secs(60));
    assert!(matches!(
        h.tracker.process(&report().at(50.0, -75.0)),
        Outcome::Stored { .. }
    ));
    let calls_after_failure = h.faults.trim_calls.load(Ordering::SeqCst);
    assert_eq!(h.rows(), 4);

    // Still inside the interval: no new attempt even though the last one failed.
    h.faults.trims.store(false, Ordering::SeqCst);
    h.clock.advance(Duration::from_secs(10));
    h.tracker.process(&report().at(51.0, -75.0));
    assert_eq!(h.faults.trim_calls.load(Ordering::SeqCst), calls_after_failure);

    h.clock.advance(Duration::from_secs(60));
    h.tracker.process(&report().at(52.0, -75.0));
    assert_eq!(h.rows(), 2);
}
