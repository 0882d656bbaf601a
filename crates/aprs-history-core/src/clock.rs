//! Time sources for arrival stamps and rate limiting.
//!
//! Arrival times come from the wall clock; the retention rate limit uses a
//! monotonic reading so that wall-clock steps cannot bypass it. Tests drive
//! both through [`ManualClock`].

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A source of wall-clock and monotonic time.
pub trait Clock: Send + Sync {
    /// Current wall-clock time, used as the arrival stamp of a report.
    fn now(&self) -> DateTime<Utc>;

    /// Monotonic time elapsed since the clock was created.
    fn monotonic(&self) -> Duration;
}

/// The real clock.
#[derive(Debug)]
pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic(&self) -> Duration {
        self.started.elapsed()
    }
}

/// A clock that only moves when told to.
///
/// [`advance`](ManualClock::advance) moves wall and monotonic time together.
#[derive(Debug)]
pub struct ManualClock {
    wall_us: AtomicI64,
    elapsed_us: AtomicU64,
}

impl ManualClock {
    /// Start the clock at `start` with zero monotonic time elapsed.
    #[must_use]
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            wall_us: AtomicI64::new(start.timestamp_micros()),
            elapsed_us: AtomicU64::new(0),
        }
    }

    /// Move both readings forward by `step`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn advance(&self, step: Duration) {
        let micros = step.as_micros() as u64;
        self.elapsed_us.fetch_add(micros, Ordering::SeqCst);
        self.wall_us.fetch_add(micros as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let micros = self.wall_us.load(Ordering::SeqCst);
        DateTime::from_timestamp_micros(micros).unwrap_or_default()
    }

    fn monotonic(&self) -> Duration {
        Duration::from_micros(self.elapsed_us.load(Ordering::SeqCst))
    }
}
