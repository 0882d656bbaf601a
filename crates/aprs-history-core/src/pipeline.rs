//! One report, end to end.
//!
//! [`Tracker::process`] runs the fixed sequence for each incoming report:
//!
//! 1. give the retention trimmer its chance to run
//! 2. stamp the arrival time
//! 3. validate (rules 1–7)
//! 4. look for a duplicate within the window
//! 5. delete the prior duplicate, if any
//! 6. upsert the new record
//!
//! No step can stop the process. Store failures are logged with their
//! [`ErrorCode`] and turn into an [`Outcome`]; the next report proceeds
//! normally.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::FilterConfig;
use crate::dedup::{Decision, dedupe};
use crate::error::ErrorCode;
use crate::model::{HistoryRecord, PositionReport};
use crate::retention::RetentionTrimmer;
use crate::store::{HistoryStore, StoreError};
use crate::validate::{RejectReason, Verdict, validate_with_history};

/// What happened to one report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Written to history; `replaced` is true when an earlier duplicate
    /// was removed first.
    Stored { replaced: bool },
    /// Dropped by a validation rule.
    Rejected(RejectReason),
    /// Accepted but the upsert failed; the report is lost.
    WriteFailed,
}

/// Write `report` as a history record stamped with `arrival_at`.
///
/// # Errors
///
/// Returns an error if the report has no position or the upsert fails.
pub fn persist<S: HistoryStore + ?Sized>(
    report: &PositionReport,
    arrival_at: DateTime<Utc>,
    store: &S,
) -> Result<(), StoreError> {
    let record = HistoryRecord::from_report(report, arrival_at)
        .ok_or_else(|| StoreError::MissingPosition(report.station_id.clone()))?;
    store.upsert_record(&record)
}

/// The per-report pipeline bound to one store.
///
/// Filter configuration and the trimmer are shared; the store is owned, so
/// each worker thread runs its own `Tracker` over its own connection.
pub struct Tracker<S, C> {
    store: S,
    clock: Arc<C>,
    filter: Arc<FilterConfig>,
    trimmer: Arc<RetentionTrimmer>,
}

impl<S: std::fmt::Debug, C> std::fmt::Debug for Tracker<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("store", &self.store)
            .field("trimmer", &self.trimmer)
            .finish_non_exhaustive()
    }
}

impl<S: HistoryStore, C: Clock> Tracker<S, C> {
    #[must_use]
    pub const fn new(
        store: S,
        clock: Arc<C>,
        filter: Arc<FilterConfig>,
        trimmer: Arc<RetentionTrimmer>,
    ) -> Self {
        Self {
            store,
            clock,
            filter,
            trimmer,
        }
    }

    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Run `report` through the whole pipeline.
    pub fn process(&self, report: &PositionReport) -> Outcome {
        self.trimmer.maybe_trim(&self.store);

        let arrival_at = self.clock.now();

        if let Verdict::Reject(reason) = validate_with_history(report, &self.filter, &self.store) {
            tracing::info!(
                code = %ErrorCode::ValidationRejection,
                station = %report.station_id,
                reason = %reason,
                "report rejected"
            );
            return Outcome::Rejected(reason);
        }

        let decision = dedupe(
            report,
            arrival_at,
            self.filter.dedup_window,
            self.filter.dedup_tolerance_e6,
            &self.store,
        );

        let mut replaced = false;
        if let Decision::ReplacePrior(prior) = decision {
            match self.store.delete_record(prior) {
                Ok(()) => replaced = true,
                Err(error) => {
                    tracing::warn!(
                        code = %ErrorCode::StoreWriteError,
                        station = %report.station_id,
                        record = %prior,
                        error = %error,
                        "could not remove duplicate, storing anyway"
                    );
                }
            }
        }

        match persist(report, arrival_at, &self.store) {
            Ok(()) => {
                tracing::trace!(station = %report.station_id, replaced, "report stored");
                Outcome::Stored { replaced }
            }
            Err(error) => {
                tracing::error!(
                    code = %ErrorCode::StoreWriteError,
                    station = %report.station_id,
                    error = %error,
                    "failed to store report"
                );
                Outcome::WriteFailed
            }
        }
    }
}

/// Running totals for an ingest session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    /// Reports handed to the pipeline (parse failures excluded).
    pub processed: usize,
    pub stored: usize,
    /// Stored reports that replaced an earlier duplicate.
    pub replaced: usize,
    pub rejected: BTreeMap<RejectReason, usize>,
    pub write_failures: usize,
    /// Input lines that never became a report.
    pub parse_failures: usize,
}

impl IngestStats {
    pub fn record(&mut self, outcome: Outcome) {
        self.processed += 1;
        match outcome {
            Outcome::Stored { replaced } => {
                self.stored += 1;
                if replaced {
                    self.replaced += 1;
                }
            }
            Outcome::Rejected(reason) => *self.rejected.entry(reason).or_default() += 1,
            Outcome::WriteFailed => self.write_failures += 1,
        }
    }

    pub const fn record_parse_failure(&mut self) {
        self.parse_failures += 1;
    }

    #[must_use]
    pub fn rejected_total(&self) -> usize {
        self.rejected.values().sum()
    }

    /// Fold another worker's totals into these.
    pub fn merge(&mut self, other: &Self) {
        self.processed += other.processed;
        self.stored += other.stored;
        self.replaced += other.replaced;
        self.write_failures += other.write_failures;
        self.parse_failures += other.parse_failures;
        for (reason, count) in &other.rejected {
            *self.rejected.entry(*reason).or_default() += count;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RetentionPolicy;
    use crate::db::SqliteHistoryStore;
    use std::sync::Mutex;
    use std::time::Duration;
    use tracing_subscriber::layer::{Context, SubscriberExt};

    /// Levels of every event carrying a `reason` field.
    #[derive(Clone, Default)]
    struct RejectionLevels(Arc<Mutex<Vec<tracing::Level>>>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for RejectionLevels {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if event.metadata().fields().field("reason").is_some() {
                self.0
                    .lock()
                    .expect("levels lock")
                    .push(*event.metadata().level());
            }
        }
    }

    fn tracker(filter: FilterConfig) -> (Tracker<SqliteHistoryStore, ManualClock>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_at(
            DateTime::from_timestamp(1_700_000_000, 0).expect("valid ts"),
        ));
        let trimmer = Arc::new(RetentionTrimmer::new(
            RetentionPolicy::default(),
            clock.clone(),
        ));
        let store = SqliteHistoryStore::in_memory().expect("store");
        (
            Tracker::new(store, clock.clone(), Arc::new(filter), trimmer),
            clock,
        )
    }

    fn report() -> PositionReport {
        PositionReport::new("KD2ABC")
            .via(["WIDE1-1", "qAR", "N0CALL"])
            .at(40.0, -75.0)
            .with_altitude(500.0)
    }

    #[test]
    fn stores_accepted_report() {
        let (tracker, _clock) = tracker(FilterConfig::default());
        assert_eq!(tracker.process(&report()), Outcome::Stored { replaced: false });
        assert_eq!(tracker.store().count_records().expect("count"), 1);
    }

    #[test]
    fn rejected_report_is_not_written() {
        let (tracker, _clock) = tracker(FilterConfig::default());
        let mut bad = report();
        bad.longitude = None;
        assert_eq!(
            tracker.process(&bad),
            Outcome::Rejected(RejectReason::MissingCoordinates)
        );
        assert_eq!(tracker.store().count_records().expect("count"), 0);
    }

    #[test]
    fn rejections_are_logged_at_info() {
        let (tracker, _clock) = tracker(FilterConfig::default());
        let levels = RejectionLevels::default();
        let subscriber = tracing_subscriber::registry().with(levels.clone());

        let outcome = tracing::subscriber::with_default(subscriber, || {
            tracker.process(&report().at(0.0, 0.0))
        });

        assert_eq!(
            outcome,
            Outcome::Rejected(RejectReason::NearZeroCoordinates)
        );
        let seen = levels.0.lock().expect("levels lock").clone();
        assert_eq!(seen, vec![tracing::Level::INFO]);
    }

    #[test]
    fn duplicate_within_window_replaces_prior() {
        let (tracker, clock) = tracker(FilterConfig::default());
        tracker.process(&report());
        clock.advance(Duration::from_secs(300));

        assert_eq!(tracker.process(&report()), Outcome::Stored { replaced: true });
        let rows = tracker.store().records_for("KD2ABC").expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1.arrival_at, clock.now());
    }

    #[test]
    fn stats_fold_outcomes() {
        let mut stats = IngestStats::default();
        stats.record(Outcome::Stored { replaced: false });
        stats.record(Outcome::Stored { replaced: true });
        stats.record(Outcome::Rejected(RejectReason::BannedComment));
        stats.record(Outcome::WriteFailed);
        stats.record_parse_failure();

        let mut total = IngestStats::default();
        total.record(Outcome::Rejected(RejectReason::BannedComment));
        total.merge(&stats);

        assert_eq!(total.processed, 5);
        assert_eq!(total.stored, 2);
        assert_eq!(total.replaced, 1);
        assert_eq!(total.rejected.get(&RejectReason::BannedComment), Some(&2));
        assert_eq!(total.rejected_total(), 2);
        assert_eq!(total.write_failures, 1);
        assert_eq!(total.parse_failures, 1);
    }

    #[test]
    fn persist_refuses_reports_without_position() {
        let store = SqliteHistoryStore::in_memory().expect("store");
        let arrival = DateTime::from_timestamp(1_700_000_000, 0).expect("valid ts");
        let error = persist(&PositionReport::new("N0CALL"), arrival, &store)
            .expect_err("no position");
        assert!(matches!(error, StoreError::MissingPosition(station) if station == "N0CALL"));
    }
}
