//! `aprs-history check`: dry-run the stateless filters over reports.
//!
//! Nothing is written and the history store is never opened, so the relay
//! replay rule, which needs stored history, is not evaluated.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use aprs_history_core::config::{FilterConfig, Settings};
use aprs_history_core::ingest::decode_line;
use aprs_history_core::validate::{RejectReason, validate};
use clap::Args;
use serde::Serialize;

use crate::output::{OutputMode, render};

/// Arguments for `aprs-history check`.
#[derive(Args, Debug, Default)]
pub struct CheckArgs {
    /// NDJSON file of decoded reports; stdin when omitted or `-`.
    pub input: Option<PathBuf>,

    /// Only list rejected and undecodable lines.
    #[arg(long)]
    pub rejected_only: bool,
}

/// One input line's verdict.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct CheckRow {
    pub line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub station: Option<String>,
    pub verdict: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckRow {
    fn is_accept(&self) -> bool {
        self.verdict == "accept"
    }
}

/// Execute `aprs-history check`.
pub fn run_check(args: &CheckArgs, settings: &Settings, output: OutputMode) -> Result<()> {
    let filter = FilterConfig::from_settings(settings)?;
    let reader = super::open_input(args.input.as_deref())?;

    let mut rows = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.context("read report input")?;
        rows.extend(
            check_line(index + 1, &line, &filter)
                .filter(|row| !(args.rejected_only && row.is_accept())),
        );
    }

    render(output, &rows, |rows, w| {
        for row in rows {
            write_row(row, w)?;
        }
        Ok(())
    })
}

/// Verdict for one line; `None` for blank lines.
fn check_line(line_no: usize, line: &str, filter: &FilterConfig) -> Option<CheckRow> {
    if line.trim().is_empty() {
        return None;
    }

    let row = match decode_line(line) {
        Ok(report) => {
            let reason = validate(&report, filter).reason();
            CheckRow {
                line: line_no,
                station: Some(report.station_id),
                verdict: if reason.is_some() { "reject" } else { "accept" },
                reason,
                error: None,
            }
        }
        Err(error) => CheckRow {
            line: line_no,
            station: None,
            verdict: "unparsed",
            reason: None,
            error: Some(error.to_string()),
        },
    };
    Some(row)
}

fn write_row(row: &CheckRow, w: &mut dyn Write) -> std::io::Result<()> {
    let station = row.station.as_deref().unwrap_or("-");
    match (&row.reason, &row.error) {
        (Some(reason), _) => writeln!(w, "{}\t{station}\t{}\t{reason}", row.line, row.verdict),
        (None, Some(error)) => writeln!(w, "{}\t{station}\t{}\t{error}", row.line, row.verdict),
        (None, None) => writeln!(w, "{}\t{station}\t{}", row.line, row.verdict),
    }
}
