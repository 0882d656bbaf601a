//! `aprs-history ingest`: run reports through the pipeline into history.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use aprs_history_core::clock::SystemClock;
use aprs_history_core::config::{FilterConfig, RetentionPolicy, Settings};
use aprs_history_core::ingest::{self, Dispatcher, WorkerPool};
use aprs_history_core::pipeline::{IngestStats, Tracker};
use aprs_history_core::retention::RetentionTrimmer;
use clap::Args;

use crate::output::{OutputMode, pretty_kv, pretty_section, render};

/// Arguments for `aprs-history ingest`.
#[derive(Args, Debug, Default)]
pub struct IngestArgs {
    /// NDJSON file of decoded reports; stdin when omitted or `-`.
    pub input: Option<PathBuf>,

    /// Worker count, overriding `ingest.workers`.
    #[arg(long)]
    pub workers: Option<usize>,
}

/// Exit status after a second interrupt, as a shell reports SIGINT.
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Raise `stop`; returns true when it was already raised.
///
/// The first interrupt lets the reader finish the line in hand and drain the
/// workers. The stop flag is only checked between lines, so an idle stdin
/// stream keeps waiting; a second interrupt exits at once.
fn request_stop(stop: &AtomicBool) -> bool {
    stop.swap(true, Ordering::SeqCst)
}

/// Execute `aprs-history ingest`.
pub fn run_ingest(
    args: &IngestArgs,
    settings: &Settings,
    output: OutputMode,
    quiet: bool,
) -> Result<()> {
    let filter = Arc::new(FilterConfig::from_settings(settings)?);
    let clock = Arc::new(SystemClock::new());
    let trimmer = Arc::new(RetentionTrimmer::new(
        RetentionPolicy::from_settings(settings),
        clock.clone(),
    ));

    let workers = args.workers.unwrap_or(settings.ingest.workers).max(1);
    let mut trackers = Vec::with_capacity(workers);
    for _ in 0..workers {
        trackers.push(Tracker::new(
            super::open_store(settings)?,
            clock.clone(),
            filter.clone(),
            trimmer.clone(),
        ));
    }

    let dispatcher = if workers == 1 {
        let tracker = trackers.pop().context("no tracker was built")?;
        Dispatcher::inline(tracker)
    } else {
        Dispatcher::Pool(WorkerPool::spawn(trackers, settings.ingest.queue_depth)?)
    };

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            if request_stop(&stop) {
                std::process::exit(INTERRUPTED_EXIT_CODE);
            }
        })
        .context("install interrupt handler")?;
    }

    tracing::info!(
        workers,
        database = %settings.database.path.display(),
        "ingest started"
    );
    let reader = super::open_input(args.input.as_deref())?;
    let stats = ingest::run(reader, dispatcher, &stop)?;
    tracing::info!(
        processed = stats.processed,
        stored = stats.stored,
        rejected = stats.rejected_total(),
        "ingest finished"
    );

    if quiet && !output.is_json() {
        return Ok(());
    }
    render(output, &stats, |stats, w| {
        if output.is_pretty() {
            render_stats_pretty(stats, w)
        } else {
            render_stats_text(stats, w)
        }
    })
}

fn render_stats_pretty(stats: &IngestStats, w: &mut dyn Write) -> std::io::Result<()> {
    pretty_section(w, "Ingest summary")?;
    pretty_kv(w, "processed", stats.processed.to_string())?;
    pretty_kv(w, "stored", stats.stored.to_string())?;
    pretty_kv(w, "replaced", stats.replaced.to_string())?;
    pretty_kv(w, "rejected", stats.rejected_total().to_string())?;
    for (reason, count) in &stats.rejected {
        writeln!(w, "  {reason:<24} {count}")?;
    }
    pretty_kv(w, "write failures", stats.write_failures.to_string())?;
    pretty_kv(w, "parse failures", stats.parse_failures.to_string())
}

fn render_stats_text(stats: &IngestStats, w: &mut dyn Write) -> std::io::Result<()> {
    write!(
        w,
        "processed={} stored={} replaced={} rejected={} write_failures={} parse_failures={}",
        stats.processed,
        stats.stored,
        stats.replaced,
        stats.rejected_total(),
        stats.write_failures,
        stats.parse_failures
    )?;
    for (reason, count) in &stats.rejected {
        write!(w, " {reason}={count}")?;
    }
    writeln!(w)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aprs_history_core::pipeline::Outcome;
    use aprs_history_core::validate::RejectReason;

    fn sample() -> IngestStats {
        let mut stats = IngestStats::default();
        stats.record(Outcome::Stored { replaced: true });
        stats.record(Outcome::Rejected(RejectReason::BannedComment));
        stats.record_parse_failure();
        stats
    }

    #[test]
    fn second_interrupt_requests_exit() {
        let stop = AtomicBool::new(false);
        assert!(!request_stop(&stop));
        assert!(stop.load(Ordering::SeqCst));
        assert!(request_stop(&stop));
    }

    #[test]
    fn text_summary_is_one_line() {
        let mut buf = Vec::new();
        render_stats_text(&sample(), &mut buf).expect("render");
        let text = String::from_utf8(buf).expect("utf8");
        assert_eq!(
            text,
            "processed=2 stored=1 replaced=1 rejected=1 write_failures=0 parse_failures=1 banned_comment=1\n"
        );
    }

    #[test]
    fn pretty_summary_lists_reasons() {
        let mut buf = Vec::new();
        render_stats_pretty(&sample(), &mut buf).expect("render");
        let text = String::from_utf8(buf).expect("utf8");
        assert!(text.starts_with("Ingest summary\n"));
        assert!(text.contains("banned_comment"));
    }
}
