//! SQLite history database utilities.
//!
//! Runtime defaults:
//! - `journal_mode = WAL` so partitioned workers can read while one writes
//! - `busy_timeout` bounds how long any store call waits on a lock, so a
//!   stalled writer cannot wedge ingestion indefinitely
//! - `synchronous = NORMAL`, which is durable enough under WAL

pub mod history;
pub mod migrations;
pub mod schema;

pub use history::SqliteHistoryStore;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::{path::Path, time::Duration};

/// Busy timeout used for history DB connections unless configured.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (or create) the history database, apply runtime pragmas, and
/// migrate schema to the latest version.
///
/// # Errors
///
/// Returns an error if opening/configuring/migrating the database fails.
pub fn open_history(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create history db directory {}", parent.display()))?;
    }

    let mut conn = Connection::open(path)
        .with_context(|| format!("open history database {}", path.display()))?;

    configure_connection(&conn, busy_timeout).context("configure sqlite pragmas")?;
    migrations::ensure_supported(&conn)?;
    migrations::migrate(&mut conn).context("apply history migrations")?;

    Ok(conn)
}

/// Open a private in-memory history database, fully migrated.
///
/// # Errors
///
/// Returns an error if SQLite cannot allocate or migrate the database.
pub fn open_in_memory() -> Result<Connection> {
    let mut conn = Connection::open_in_memory().context("open in-memory history database")?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)
        .context("configure busy timeout")?;
    migrations::migrate(&mut conn).context("apply history migrations")?;
    Ok(conn)
}

fn configure_connection(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(busy_timeout)?;
    Ok(())
}
