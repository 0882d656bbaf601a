//! Subcommand handlers.
//!
//! Each handler takes its parsed args, the loaded [`Settings`], and the
//! resolved [`OutputMode`](crate::output::OutputMode).

pub mod check;
pub mod config;
pub mod ingest;
pub mod trim;

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use aprs_history_core::config::Settings;
use aprs_history_core::db::SqliteHistoryStore;
use aprs_history_core::error::ErrorCode;

/// Open the configured history database.
///
/// A failure here is fatal for the command, and is logged as such.
pub fn open_store(settings: &Settings) -> Result<SqliteHistoryStore> {
    let path = &settings.database.path;
    let timeout = Duration::from_millis(settings.database.busy_timeout_ms);
    SqliteHistoryStore::open(path, timeout).map_err(|error| {
        tracing::error!(
            code = %ErrorCode::StoreOpenError,
            path = %path.display(),
            error = %format!("{error:#}"),
            "cannot open history store"
        );
        error.context(ErrorCode::StoreOpenError.message())
    })
}

/// Reports come from `path`, or stdin when it is absent or `-`.
pub fn open_input(path: Option<&Path>) -> Result<Box<dyn BufRead>> {
    match path {
        Some(path) if path != Path::new("-") => {
            let file = File::open(path)
                .with_context(|| format!("open report input {}", path.display()))?;
            Ok(Box::new(BufReader::new(file)))
        }
        _ => Ok(Box::new(BufReader::new(io::stdin()))),
    }
}
