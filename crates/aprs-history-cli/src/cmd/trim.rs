//! `aprs-history trim`: enforce retention once, now.

use std::sync::Arc;

use anyhow::Result;
use aprs_history_core::clock::SystemClock;
use aprs_history_core::config::{RetentionDepth, RetentionPolicy, Settings};
use aprs_history_core::error::ErrorCode;
use aprs_history_core::retention::{RetentionTrimmer, TrimReport};
use clap::Args;
use serde::Serialize;

use crate::output::{OutputMode, pretty_kv, pretty_section, render};

/// Arguments for `aprs-history trim`.
#[derive(Args, Debug, Default)]
pub struct TrimArgs {}

#[derive(Debug, Serialize)]
struct TrimPayload {
    /// Rows kept per station; `None` when unlimited.
    keep: Option<usize>,
    #[serde(flatten)]
    report: TrimReport,
}

/// Execute `aprs-history trim`.
pub fn run_trim(
    _args: &TrimArgs,
    settings: &Settings,
    output: OutputMode,
    quiet: bool,
) -> Result<()> {
    let policy = RetentionPolicy::from_settings(settings);
    let report = if policy.depth == RetentionDepth::Unlimited {
        tracing::info!("history.keep is unlimited, nothing to trim");
        TrimReport::default()
    } else {
        let store = super::open_store(settings)?;
        let trimmer = RetentionTrimmer::new(policy, Arc::new(SystemClock::new()));
        trimmer.trim_now(&store).map_err(|error| {
            tracing::error!(code = %ErrorCode::TrimError, error = %error, "trim failed");
            anyhow::Error::new(error).context(ErrorCode::TrimError.message())
        })?
    };

    if quiet && !output.is_json() {
        return Ok(());
    }
    let payload = TrimPayload {
        keep: policy.depth.limit(),
        report,
    };
    render(output, &payload, |payload, w| {
        let keep = payload
            .keep
            .map_or_else(|| "all".to_string(), |k| k.to_string());
        if output.is_pretty() {
            pretty_section(w, "Retention trim")?;
            pretty_kv(w, "keep", keep)?;
            pretty_kv(w, "stations", payload.report.stations.to_string())?;
            pretty_kv(w, "removed", payload.report.removed.to_string())?;
            pretty_kv(w, "failed", payload.report.failed.to_string())
        } else {
            writeln!(
                w,
                "keep={keep} stations={} removed={} failed={}",
                payload.report.stations, payload.report.removed, payload.report.failed
            )
        }
    })
}
