//! Feeding decoded reports into one or more [`Tracker`]s.
//!
//! Input is newline-delimited JSON, one decoded position report per line.
//! With a single worker, reports are processed inline on the reading thread.
//! With more, each station is pinned to one worker by hashing its id, so a
//! station's reports are always handled in arrival order while different
//! stations proceed in parallel.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, bail};

use crate::clock::Clock;
use crate::error::ErrorCode;
use crate::model::PositionReport;
use crate::pipeline::{IngestStats, Tracker};
use crate::store::HistoryStore;

/// A line that could not be turned into a report.
#[derive(Debug, thiserror::Error)]
pub enum ParseFailure {
    #[error("malformed report: {0}")]
    Json(#[from] serde_json::Error),

    #[error("report has no station id")]
    MissingStation,
}

/// Decode one NDJSON line.
///
/// # Errors
///
/// Returns [`ParseFailure`] if the line is not a JSON report or names no
/// station.
pub fn decode_line(line: &str) -> Result<PositionReport, ParseFailure> {
    let mut report: PositionReport = serde_json::from_str(line)?;
    let trimmed = report.station_id.trim();
    if trimmed.is_empty() {
        return Err(ParseFailure::MissingStation);
    }
    if trimmed.len() != report.station_id.len() {
        report.station_id = trimmed.to_string();
    }
    Ok(report)
}

// ---------------------------------------------------------------------------
// WorkerPool
// ---------------------------------------------------------------------------

/// Trackers on their own threads, fed through bounded queues.
#[derive(Debug)]
pub struct WorkerPool {
    senders: Vec<SyncSender<PositionReport>>,
    handles: Vec<JoinHandle<IngestStats>>,
}

impl WorkerPool {
    /// Start one thread per tracker. Each queue holds at most
    /// `queue_depth` reports; a full queue blocks the submitter.
    ///
    /// # Errors
    ///
    /// Returns an error if `trackers` is empty or a thread cannot be
    /// spawned.
    pub fn spawn<S, C>(trackers: Vec<Tracker<S, C>>, queue_depth: usize) -> Result<Self>
    where
        S: HistoryStore + Send + 'static,
        C: Clock + 'static,
    {
        if trackers.is_empty() {
            bail!("worker pool needs at least one tracker");
        }

        let mut senders = Vec::with_capacity(trackers.len());
        let mut handles = Vec::with_capacity(trackers.len());

        for (index, tracker) in trackers.into_iter().enumerate() {
            let (tx, rx) = mpsc::sync_channel::<PositionReport>(queue_depth.max(1));
            let handle = thread::Builder::new()
                .name(format!("ingest-{index}"))
                .spawn(move || {
                    let mut stats = IngestStats::default();
                    for report in rx {
                        stats.record(tracker.process(&report));
                    }
                    tracing::debug!(worker = index, processed = stats.processed, "worker drained");
                    stats
                })
                .with_context(|| format!("spawn ingest worker {index}"))?;
            senders.push(tx);
            handles.push(handle);
        }

        Ok(Self { senders, handles })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.senders.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    /// Queue `report` on the worker that owns its station.
    ///
    /// # Errors
    ///
    /// Returns an error if that worker has stopped.
    pub fn submit(&self, report: PositionReport) -> Result<()> {
        let index = partition(&report.station_id, self.senders.len());
        let Some(sender) = self.senders.get(index) else {
            bail!("no worker for partition {index}");
        };
        if sender.send(report).is_err() {
            bail!("ingest worker {index} has stopped");
        }
        Ok(())
    }

    /// Close the queues, let every worker finish what is queued, and
    /// collect their totals.
    pub fn shutdown(self) -> IngestStats {
        drop(self.senders);

        let mut total = IngestStats::default();
        for (index, handle) in self.handles.into_iter().enumerate() {
            match handle.join() {
                Ok(stats) => total.merge(&stats),
                Err(_) => tracing::error!(worker = index, "ingest worker panicked"),
            }
        }
        total
    }
}

/// Stable worker index for `station_id` among `workers`.
#[must_use]
pub fn partition(station_id: &str, workers: usize) -> usize {
    if workers <= 1 {
        return 0;
    }
    let mut hasher = DefaultHasher::new();
    station_id.hash(&mut hasher);
    let workers = workers as u64;
    usize::try_from(hasher.finish() % workers).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Where decoded reports go: straight into one tracker, or into a pool.
#[derive(Debug)]
pub enum Dispatcher<S, C> {
    Inline {
        tracker: Tracker<S, C>,
        stats: IngestStats,
    },
    Pool(WorkerPool),
}

impl<S: HistoryStore, C: Clock> Dispatcher<S, C> {
    #[must_use]
    pub fn inline(tracker: Tracker<S, C>) -> Self {
        Self::Inline {
            tracker,
            stats: IngestStats::default(),
        }
    }

    /// Hand over one report.
    ///
    /// # Errors
    ///
    /// Returns an error if a pooled worker has stopped.
    pub fn submit(&mut self, report: PositionReport) -> Result<()> {
        match self {
            Self::Inline { tracker, stats } => {
                stats.record(tracker.process(&report));
                Ok(())
            }
            Self::Pool(pool) => pool.submit(report),
        }
    }

    /// Wait for outstanding work and return the totals.
    #[must_use]
    pub fn finish(self) -> IngestStats {
        match self {
            Self::Inline { stats, .. } => stats,
            Self::Pool(pool) => pool.shutdown(),
        }
    }
}

/// Read NDJSON reports from `reader` until end of input or until `stop`
/// is raised, dispatching each one. Undecodable lines are logged and
/// counted; blank lines are skipped.
///
/// The returned totals include parse failures and everything the
/// dispatcher processed.
///
/// `stop` is checked before each line is read, so a reader blocked on idle
/// input only notices it once the next line (or end of input) arrives.
///
/// # Errors
///
/// Returns an error if reading the input fails or a worker has stopped.
pub fn run<R, S, C>(reader: R, mut dispatcher: Dispatcher<S, C>, stop: &AtomicBool) -> Result<IngestStats>
where
    R: BufRead,
    S: HistoryStore,
    C: Clock,
{
    let mut parse_failures = 0_usize;
    let mut outcome = Ok(());

    for (index, line) in reader.lines().enumerate() {
        if stop.load(Ordering::SeqCst) {
            tracing::info!(line = index + 1, "stop requested, finishing in-flight reports");
            break;
        }

        let line = match line.context("read report input") {
            Ok(line) => line,
            Err(error) => {
                outcome = Err(error);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match decode_line(&line) {
            Ok(report) => {
                if let Err(error) = dispatcher.submit(report) {
                    outcome = Err(error);
                    break;
                }
            }
            Err(error) => {
                parse_failures += 1;
                tracing::warn!(
                    code = %ErrorCode::UpstreamParseFailure,
                    line = index + 1,
                    error = %error,
                    "skipping undecodable report"
                );
            }
        }
    }

    let mut stats = dispatcher.finish();
    stats.parse_failures += parse_failures;
    outcome.map(|()| stats)
}
