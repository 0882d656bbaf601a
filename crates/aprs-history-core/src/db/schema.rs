//! SQLite schema for the position history.
//!
//! - `history` holds one row per accepted report, unique on
//!   `(station_id, arrival_at_us)`; `lat_e6`/`lon_e6` carry the rounded
//!   position used for duplicate and replay matching
//! - `history_meta` tracks the applied schema version

/// Migration v1: history table plus metadata.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS history (
    record_id INTEGER PRIMARY KEY AUTOINCREMENT,
    station_id TEXT NOT NULL CHECK (length(trim(station_id)) > 0),
    arrival_at_us INTEGER NOT NULL,
    observed_at_s INTEGER,
    latitude REAL NOT NULL CHECK (latitude BETWEEN -90.0 AND 90.0),
    longitude REAL NOT NULL CHECK (longitude BETWEEN -180.0 AND 180.0),
    lat_e6 INTEGER NOT NULL,
    lon_e6 INTEGER NOT NULL,
    altitude REAL,
    course REAL,
    speed REAL,
    comment TEXT,
    route_path TEXT NOT NULL DEFAULT '',
    raw_payload TEXT NOT NULL DEFAULT '',
    UNIQUE (station_id, arrival_at_us)
);

CREATE TABLE IF NOT EXISTS history_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL
);

INSERT OR IGNORE INTO history_meta (id, schema_version) VALUES (1, 1);
";

/// Migration v2: read-path indexes for the dedup and replay lookups.
pub const MIGRATION_V2_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_history_station_arrival
    ON history(station_id, arrival_at_us DESC);

CREATE INDEX IF NOT EXISTS idx_history_station_grid
    ON history(station_id, lat_e6, lon_e6);
";

/// Indexes every fully migrated database must have.
pub const REQUIRED_INDEXES: &[&str] = &["idx_history_station_arrival", "idx_history_station_grid"];
