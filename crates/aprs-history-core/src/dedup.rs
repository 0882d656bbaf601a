//! Duplicate suppression for accepted reports.
//!
//! A station beaconing the same position many times within the window keeps
//! only its newest copy: the most recent prior match is removed before the
//! new report is written.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::ErrorCode;
use crate::model::{PositionReport, RecordId};
use crate::store::HistoryStore;

/// What to do with the prior history before persisting a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Remove this earlier copy, then insert.
    ReplacePrior(RecordId),
    /// Nothing to remove.
    InsertFresh,
}

/// Look for a record of the same station, at the same rounded position,
/// that arrived strictly within `window` before `now`.
///
/// Only the single most recent match is reported. A failed lookup is logged
/// and answered with [`Decision::InsertFresh`].
pub fn dedupe<S: HistoryStore + ?Sized>(
    report: &PositionReport,
    now: DateTime<Utc>,
    window: Duration,
    tolerance_e6: u32,
    store: &S,
) -> Decision {
    let Some(point) = report.grid_point() else {
        return Decision::InsertFresh;
    };

    let Ok(window) = chrono::Duration::from_std(window) else {
        return Decision::InsertFresh;
    };
    let since = now - window;

    match store.find_recent_match(&report.station_id, since, point, tolerance_e6) {
        Ok(Some(prior)) => Decision::ReplacePrior(prior),
        Ok(None) => Decision::InsertFresh,
        Err(error) => {
            tracing::warn!(
                code = %ErrorCode::StoreReadError,
                station = %report.station_id,
                error = %error,
                "duplicate lookup failed, inserting without dedup"
            );
            Decision::InsertFresh
        }
    }
}
