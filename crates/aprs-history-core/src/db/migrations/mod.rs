//! SQLite schema migrations for the history database.
//!
//! The applied version lives in `PRAGMA user_version` and is mirrored in
//! `history_meta`. Upgrade path:
//!
//! - v1 creates `history` and `history_meta`
//! - v2 adds the `(station_id, arrival_at_us)` and grid indexes behind the
//!   dedup, replay and trim queries
//!
//! Rows are never rewritten by a migration. A database stamped with a newer
//! version than [`LATEST_SCHEMA_VERSION`] is refused instead of written to.

use super::schema;
use anyhow::{Result, bail};
use rusqlite::{Connection, types::Type};

/// Latest schema version understood by this binary.
pub const LATEST_SCHEMA_VERSION: u32 = 2;

const MIGRATIONS: &[(u32, &str)] = &[(1, schema::MIGRATION_V1_SQL), (2, schema::MIGRATION_V2_SQL)];

/// Read `PRAGMA user_version` and convert it to a Rust `u32`.
///
/// # Errors
///
/// Returns an error if querying SQLite fails or the version value cannot be
/// represented as `u32`.
pub fn current_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    u32::try_from(version).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(error))
    })
}

/// Fail if `conn` holds a schema from a newer release.
///
/// # Errors
///
/// Returns an error if the version cannot be read or is newer than
/// [`LATEST_SCHEMA_VERSION`].
pub fn ensure_supported(conn: &Connection) -> Result<u32> {
    let version = current_schema_version(conn)?;
    if version > LATEST_SCHEMA_VERSION {
        bail!(
            "history schema v{version} is newer than the supported v{LATEST_SCHEMA_VERSION}; \
             upgrade aprs-history"
        );
    }
    Ok(version)
}

/// Apply all pending migrations in ascending order, each in its own
/// transaction. Already-applied versions are skipped.
///
/// # Errors
///
/// Returns an error if any migration fails.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<u32> {
    let mut current = current_schema_version(conn)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }

        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", i64::from(*version))?;
        tx.execute(
            "UPDATE history_meta SET schema_version = ?1 WHERE id = 1",
            [i64::from(*version)],
        )?;
        tx.commit()?;
        current = *version;
    }

    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::{LATEST_SCHEMA_VERSION, current_schema_version, ensure_supported, migrate};
    use crate::db::schema;
    use rusqlite::{Connection, params};

    fn sqlite_object_exists(
        conn: &Connection,
        object_type: &str,
        object_name: &str,
    ) -> rusqlite::Result<bool> {
        conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = ?1 AND name = ?2
            )",
            params![object_type, object_name],
            |row| row.get(0),
        )
    }

    #[test]
    fn migrate_empty_db_to_latest() -> rusqlite::Result<()> {
        let mut conn = Connection::open_in_memory()?;

        let applied = migrate(&mut conn)?;
        assert_eq!(applied, LATEST_SCHEMA_VERSION);
        assert_eq!(current_schema_version(&conn)?, LATEST_SCHEMA_VERSION);

        assert!(sqlite_object_exists(&conn, "table", "history")?);
        assert!(sqlite_object_exists(&conn, "table", "history_meta")?);

        for index in schema::REQUIRED_INDEXES {
            assert!(
                sqlite_object_exists(&conn, "index", index)?,
                "missing expected index {index}"
            );
        }

        Ok(())
    }

    #[test]
    fn migrate_is_idempotent() -> rusqlite::Result<()> {
        let mut conn = Connection::open_in_memory()?;

        assert_eq!(migrate(&mut conn)?, LATEST_SCHEMA_VERSION);
        assert_eq!(migrate(&mut conn)?, LATEST_SCHEMA_VERSION);

        let meta_rows: i64 =
            conn.query_row("SELECT COUNT(*) FROM history_meta", [], |row| row.get(0))?;
        assert_eq!(meta_rows, 1);

        let schema_version: i64 = conn.query_row(
            "SELECT schema_version FROM history_meta WHERE id = 1",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(schema_version, i64::from(LATEST_SCHEMA_VERSION));

        Ok(())
    }

    #[test]
    fn migrate_upgrades_from_v1_keeping_rows() -> rusqlite::Result<()> {
        let mut conn = Connection::open_in_memory()?;

        conn.execute_batch(schema::MIGRATION_V1_SQL)?;
        conn.pragma_update(None, "user_version", 1_i64)?;
        conn.execute(
            "INSERT INTO history (
                station_id, arrival_at_us, latitude, longitude, lat_e6, lon_e6
            ) VALUES ('N0CALL', 1, 40.5, -75.5, 40500000, -75500000)",
            [],
        )?;

        let applied = migrate(&mut conn)?;
        assert_eq!(applied, LATEST_SCHEMA_VERSION);

        let rows: i64 = conn.query_row("SELECT COUNT(*) FROM history", [], |row| row.get(0))?;
        assert_eq!(rows, 1);
        assert!(sqlite_object_exists(&conn, "index", "idx_history_station_grid")?);

        Ok(())
    }

    #[test]
    fn newer_schema_is_refused() -> rusqlite::Result<()> {
        let mut conn = Connection::open_in_memory()?;
        assert_eq!(ensure_supported(&conn).expect("empty db"), 0);

        migrate(&mut conn)?;
        assert_eq!(
            ensure_supported(&conn).expect("current db"),
            LATEST_SCHEMA_VERSION
        );

        conn.pragma_update(None, "user_version", i64::from(LATEST_SCHEMA_VERSION + 1))?;
        let error = ensure_supported(&conn).expect_err("future schema");
        assert!(error.to_string().contains("newer than the supported"));
        Ok(())
    }
}
