//! Per-station history depth enforcement.
//!
//! Trimming is opportunistic: every report asks [`RetentionTrimmer::maybe_trim`]
//! and at most one caller per interval actually touches storage. The slot is
//! claimed before the work starts, so a slow or failing trim still waits out
//! the full interval before the next attempt.

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::clock::Clock;
use crate::config::{RetentionDepth, RetentionPolicy};
use crate::error::ErrorCode;
use crate::store::{HistoryStore, StoreError};

const NEVER: u64 = u64::MAX;

/// Totals from one trim pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrimReport {
    /// Stations visited.
    pub stations: usize,
    /// Rows removed across all stations.
    pub removed: usize,
    /// Stations whose delete failed and were skipped.
    pub failed: usize,
}

/// Rate-limited enforcer of a [`RetentionPolicy`]. Shared by every worker.
pub struct RetentionTrimmer {
    policy: RetentionPolicy,
    clock: Arc<dyn Clock>,
    last_attempt_us: AtomicU64,
}

impl std::fmt::Debug for RetentionTrimmer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionTrimmer")
            .field("policy", &self.policy)
            .field("last_attempt_us", &self.last_attempt_us.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl RetentionTrimmer {
    #[must_use]
    pub fn new(policy: RetentionPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            clock,
            last_attempt_us: AtomicU64::new(NEVER),
        }
    }

    #[must_use]
    pub const fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Trim if the policy bounds depth and the interval since the last
    /// attempt has elapsed. Returns whether a pass ran.
    ///
    /// Errors are logged; a failed pass still counts as an attempt.
    pub fn maybe_trim<S: HistoryStore + ?Sized>(&self, store: &S) -> bool {
        if self.policy.depth == RetentionDepth::Unlimited {
            return false;
        }
        if !self.claim_slot() {
            return false;
        }

        match self.trim_now(store) {
            Ok(report) => {
                tracing::debug!(
                    stations = report.stations,
                    removed = report.removed,
                    failed = report.failed,
                    "retention pass complete"
                );
            }
            Err(error) => {
                tracing::warn!(
                    code = %ErrorCode::TrimError,
                    error = %error,
                    "retention pass could not list stations"
                );
            }
        }
        true
    }

    /// Run one pass now, ignoring the rate limit.
    ///
    /// Per-station delete failures are logged and counted in
    /// [`TrimReport::failed`]; the remaining stations are still trimmed.
    ///
    /// # Errors
    ///
    /// Returns an error if the station list cannot be read.
    pub fn trim_now<S: HistoryStore + ?Sized>(&self, store: &S) -> Result<TrimReport, StoreError> {
        let Some(keep) = self.policy.depth.limit() else {
            return Ok(TrimReport::default());
        };

        let mut report = TrimReport::default();
        for station in store.stations()? {
            report.stations += 1;
            match store.delete_older_than_kth(&station, keep) {
                Ok(removed) => report.removed += removed,
                Err(error) => {
                    report.failed += 1;
                    tracing::warn!(
                        code = %ErrorCode::TrimError,
                        station = %station,
                        error = %error,
                        "trim failed for station"
                    );
                }
            }
        }
        Ok(report)
    }

    fn claim_slot(&self) -> bool {
        let now = micros(self.clock.monotonic());
        let interval = micros(self.policy.interval);
        let mut last = self.last_attempt_us.load(Ordering::Acquire);
        loop {
            if last != NEVER && now.saturating_sub(last) < interval {
                return false;
            }
            match self.last_attempt_us.compare_exchange_weak(
                last,
                now,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => last = actual,
            }
        }
    }
}

fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(NEVER - 1)
}
