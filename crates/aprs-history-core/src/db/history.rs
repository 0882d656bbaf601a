//! [`HistoryStore`] backed by the SQLite `history` table.
//!
//! Each trait method runs in its own transaction. Writes that fail roll
//! back when the transaction guard drops, so a failed upsert leaves no
//! partial row behind.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::model::{GridPoint, HistoryRecord, RecordId};
use crate::store::{HistoryStore, StoreError};

/// Separator used to flatten the route path into one column.
const ROUTE_SEPARATOR: char = ',';

/// History rows stored in SQLite.
pub struct SqliteHistoryStore {
    conn: Connection,
}

impl std::fmt::Debug for SqliteHistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteHistoryStore")
            .field("path", &self.conn.path())
            .finish()
    }
}

impl SqliteHistoryStore {
    /// Open the database at `path`, creating and migrating it as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        Ok(Self {
            conn: super::open_history(path, busy_timeout)?,
        })
    }

    /// A fresh private database, mostly for tests and dry runs.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot create the database.
    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            conn: super::open_in_memory()?,
        })
    }

    /// All records of `station_id`, oldest arrival first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row cannot be decoded.
    pub fn records_for(&self, station_id: &str) -> Result<Vec<(RecordId, HistoryRecord)>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT record_id, station_id, arrival_at_us, observed_at_s, latitude, longitude,
                    altitude, course, speed, comment, route_path, raw_payload
             FROM history
             WHERE station_id = ?1
             ORDER BY arrival_at_us ASC",
        )?;

        let rows = stmt
            .query_map(params![station_id], |row| {
                Ok(RawRow {
                    record_id: row.get(0)?,
                    station_id: row.get(1)?,
                    arrival_at_us: row.get(2)?,
                    observed_at_s: row.get(3)?,
                    latitude: row.get(4)?,
                    longitude: row.get(5)?,
                    altitude: row.get(6)?,
                    course: row.get(7)?,
                    speed: row.get(8)?,
                    comment: row.get(9)?,
                    route_path: row.get(10)?,
                    raw_payload: row.get(11)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(RawRow::into_record).collect()
    }

    /// Total number of stored rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count_records(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM history", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

struct RawRow {
    record_id: i64,
    station_id: String,
    arrival_at_us: i64,
    observed_at_s: Option<i64>,
    latitude: f64,
    longitude: f64,
    altitude: Option<f64>,
    course: Option<f64>,
    speed: Option<f64>,
    comment: Option<String>,
    route_path: String,
    raw_payload: String,
}

impl RawRow {
    fn into_record(self) -> Result<(RecordId, HistoryRecord), StoreError> {
        let arrival_at = DateTime::from_timestamp_micros(self.arrival_at_us).ok_or_else(|| {
            StoreError::CorruptRow {
                id: self.record_id,
                reason: format!("arrival time {} out of range", self.arrival_at_us),
            }
        })?;
        let observed_at = self
            .observed_at_s
            .and_then(|secs| DateTime::from_timestamp(secs, 0));

        Ok((
            RecordId(self.record_id),
            HistoryRecord {
                station_id: self.station_id,
                arrival_at,
                observed_at,
                latitude: self.latitude,
                longitude: self.longitude,
                altitude: self.altitude,
                course: self.course,
                speed: self.speed,
                comment: self.comment,
                route_path: split_route(&self.route_path),
                raw_payload: self.raw_payload,
            },
        ))
    }
}

fn join_route(hops: &[String]) -> String {
    let mut joined = String::new();
    for (i, hop) in hops.iter().enumerate() {
        if i > 0 {
            joined.push(ROUTE_SEPARATOR);
        }
        joined.push_str(hop);
    }
    joined
}

fn split_route(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    text.split(ROUTE_SEPARATOR).map(str::to_string).collect()
}

impl HistoryStore for SqliteHistoryStore {
    fn find_recent_match(
        &self,
        station_id: &str,
        since: DateTime<Utc>,
        point: GridPoint,
        tolerance_e6: u32,
    ) -> Result<Option<RecordId>, StoreError> {
        let slack = i64::from(tolerance_e6);
        let id = self
            .conn
            .query_row(
                "SELECT record_id
                 FROM history
                 WHERE station_id = ?1
                   AND arrival_at_us > ?2
                   AND lat_e6 BETWEEN ?3 AND ?4
                   AND lon_e6 BETWEEN ?5 AND ?6
                 ORDER BY arrival_at_us DESC
                 LIMIT 1",
                params![
                    station_id,
                    since.timestamp_micros(),
                    point.lat_e6 - slack,
                    point.lat_e6 + slack,
                    point.lon_e6 - slack,
                    point.lon_e6 + slack,
                ],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(id.map(RecordId))
    }

    fn find_latest_position(&self, station_id: &str) -> Result<Option<GridPoint>, StoreError> {
        let point = self
            .conn
            .query_row(
                "SELECT lat_e6, lon_e6
                 FROM history
                 WHERE station_id = ?1
                 ORDER BY arrival_at_us DESC
                 LIMIT 1",
                params![station_id],
                |row| {
                    Ok(GridPoint {
                        lat_e6: row.get(0)?,
                        lon_e6: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(point)
    }

    fn delete_record(&self, id: RecordId) -> Result<(), StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM history WHERE record_id = ?1", params![id.0])?;
        tx.commit()?;
        Ok(())
    }

    fn upsert_record(&self, record: &HistoryRecord) -> Result<(), StoreError> {
        let point = record.grid_point();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO history (
                station_id, arrival_at_us, observed_at_s, latitude, longitude,
                lat_e6, lon_e6, altitude, course, speed, comment, route_path, raw_payload
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT (station_id, arrival_at_us) DO UPDATE SET
                observed_at_s = excluded.observed_at_s,
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                lat_e6 = excluded.lat_e6,
                lon_e6 = excluded.lon_e6,
                altitude = excluded.altitude,
                course = excluded.course,
                speed = excluded.speed,
                comment = excluded.comment,
                route_path = excluded.route_path,
                raw_payload = excluded.raw_payload",
            params![
                record.station_id,
                record.arrival_at.timestamp_micros(),
                record.observed_at.map(|ts| ts.timestamp()),
                record.latitude,
                record.longitude,
                point.lat_e6,
                point.lon_e6,
                record.altitude,
                record.course,
                record.speed,
                record.comment,
                join_route(&record.route_path),
                record.raw_payload,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn delete_older_than_kth(&self, station_id: &str, k: usize) -> Result<usize, StoreError> {
        let Some(offset) = k.checked_sub(1) else {
            return Ok(0);
        };
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);

        // Single statement: the write lock is taken before the kth row is
        // read, so a concurrent writer is waited out via `busy_timeout`.
        let removed = self.conn.execute(
            "DELETE FROM history
             WHERE station_id = ?1
               AND arrival_at_us < (
                   SELECT arrival_at_us
                   FROM history
                   WHERE station_id = ?1
                   ORDER BY arrival_at_us DESC
                   LIMIT 1 OFFSET ?2
               )",
            params![station_id, offset],
        )?;
        Ok(removed)
    }

    fn stations(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT DISTINCT station_id FROM history ORDER BY station_id")?;
        let stations = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(stations)
    }
}
