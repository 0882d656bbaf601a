//! Position reports as they arrive and history records as they are kept.
//!
//! A [`PositionReport`] is produced by an upstream decoder and lives only for
//! the duration of one pass through the pipeline. Accepted reports become a
//! [`HistoryRecord`], keyed by `(station_id, arrival_at)` where `arrival_at`
//! is the receipt time assigned here, never the station's own clock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scale factor between degrees and the integer grid used for comparisons.
pub const MICRODEGREES_PER_DEGREE: f64 = 1_000_000.0;

// ---------------------------------------------------------------------------
// PositionReport
// ---------------------------------------------------------------------------

/// One decoded position report.
///
/// Field aliases accept the dictionary layout produced by common APRS
/// decoders (`from`, `path`, `raw`, `timestamp`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionReport {
    /// Transmitting station identifier (call sign with optional SSID).
    #[serde(alias = "from")]
    pub station_id: String,
    /// Time claimed by the transmitting station, when present.
    #[serde(
        default,
        alias = "timestamp",
        with = "chrono::serde::ts_seconds_option"
    )]
    pub observed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Meters above the reference surface.
    #[serde(default)]
    pub altitude: Option<f64>,
    #[serde(default)]
    pub course: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub comment: Option<String>,
    /// Relay hops in the order the report traversed them.
    #[serde(default, alias = "path")]
    pub route_path: Vec<String>,
    /// Original encoded message, kept for auditing.
    #[serde(default, alias = "raw")]
    pub raw_payload: String,
}

impl PositionReport {
    /// Create a report with only a station id; every other field empty.
    #[must_use]
    pub fn new(station_id: impl Into<String>) -> Self {
        Self {
            station_id: station_id.into(),
            observed_at: None,
            latitude: None,
            longitude: None,
            altitude: None,
            course: None,
            speed: None,
            comment: None,
            route_path: Vec::new(),
            raw_payload: String::new(),
        }
    }

    /// Builder-style setter for latitude and longitude.
    #[must_use]
    pub fn at(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    /// Builder-style setter for altitude.
    #[must_use]
    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    /// Builder-style setter for the comment.
    #[must_use]
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Builder-style setter for the route path.
    #[must_use]
    pub fn via<I, S>(mut self, hops: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.route_path = hops.into_iter().map(Into::into).collect();
        self
    }

    /// Both coordinates, or `None` when either is missing.
    #[must_use]
    pub fn position(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }

    /// Position snapped to the comparison grid.
    #[must_use]
    pub fn grid_point(&self) -> Option<GridPoint> {
        self.position()
            .map(|(lat, lon)| GridPoint::from_degrees(lat, lon))
    }

    /// The q construct: the second-to-last route element, naming how the
    /// report entered the network.
    #[must_use]
    pub fn q_construct(&self) -> Option<&str> {
        let len = self.route_path.len();
        if len < 2 {
            return None;
        }
        self.route_path.get(len - 2).map(String::as_str)
    }

    /// First route element, only meaningful when the report was relayed
    /// through more than one hop before the q construct.
    #[must_use]
    pub fn origin(&self) -> Option<&str> {
        if self.route_path.len() > 2 {
            self.route_path.first().map(String::as_str)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// GridPoint
// ---------------------------------------------------------------------------

/// A position rounded to six decimal places and held as integer
/// micro-degrees, so equality is exact and cheap to index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridPoint {
    pub lat_e6: i64,
    pub lon_e6: i64,
}

impl GridPoint {
    /// Round a position in degrees onto the micro-degree grid.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_degrees(latitude: f64, longitude: f64) -> Self {
        Self {
            lat_e6: (latitude * MICRODEGREES_PER_DEGREE).round() as i64,
            lon_e6: (longitude * MICRODEGREES_PER_DEGREE).round() as i64,
        }
    }

    /// True when both axes differ by at most `tolerance_e6` micro-degrees.
    #[must_use]
    pub const fn matches(self, other: Self, tolerance_e6: u32) -> bool {
        let tolerance = tolerance_e6 as i64;
        (self.lat_e6 - other.lat_e6).abs() <= tolerance
            && (self.lon_e6 - other.lon_e6).abs() <= tolerance
    }
}

impl fmt::Display for GridPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        #[allow(clippy::cast_precision_loss)]
        let (lat, lon) = (
            self.lat_e6 as f64 / MICRODEGREES_PER_DEGREE,
            self.lon_e6 as f64 / MICRODEGREES_PER_DEGREE,
        );
        write!(f, "{lat:.6},{lon:.6}")
    }
}

// ---------------------------------------------------------------------------
// HistoryRecord
// ---------------------------------------------------------------------------

/// Opaque identifier of one stored history row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Persisted form of an accepted report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryRecord {
    pub station_id: String,
    /// Server-side receipt time; half of the upsert key.
    pub arrival_at: DateTime<Utc>,
    pub observed_at: Option<DateTime<Utc>>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub course: Option<f64>,
    pub speed: Option<f64>,
    pub comment: Option<String>,
    pub route_path: Vec<String>,
    pub raw_payload: String,
}

impl HistoryRecord {
    /// Build the stored form of `report` received at `arrival_at`.
    ///
    /// Returns `None` when the report has no position; validation rejects
    /// those before they get this far.
    #[must_use]
    pub fn from_report(report: &PositionReport, arrival_at: DateTime<Utc>) -> Option<Self> {
        let (latitude, longitude) = report.position()?;
        Some(Self {
            station_id: report.station_id.clone(),
            arrival_at,
            observed_at: report.observed_at,
            latitude,
            longitude,
            altitude: report.altitude,
            course: report.course,
            speed: report.speed,
            comment: report.comment.clone(),
            route_path: report.route_path.clone(),
            raw_payload: report.raw_payload.clone(),
        })
    }

    #[must_use]
    pub fn grid_point(&self) -> GridPoint {
        GridPoint::from_degrees(self.latitude, self.longitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn q_construct_is_second_to_last_hop() {
        let report = PositionReport::new("KD2ABC").via(["WIDE1-1", "qAR", "N0CALL"]);
        assert_eq!(report.q_construct(), Some("qAR"));
        assert_eq!(report.origin(), Some("WIDE1-1"));
    }

    #[test]
    fn short_paths_have_no_origin() {
        let report = PositionReport::new("KD2ABC").via(["qAC", "T2TEST"]);
        assert_eq!(report.q_construct(), Some("qAC"));
        assert_eq!(report.origin(), None);

        let lone = PositionReport::new("KD2ABC").via(["TCPIP*"]);
        assert_eq!(lone.q_construct(), None);
    }

    #[test]
    fn grid_point_rounds_to_six_decimals() {
        let point = GridPoint::from_degrees(40.000_000_4, -75.000_000_6);
        assert_eq!(point, GridPoint { lat_e6: 40_000_000, lon_e6: -75_000_001 });
        assert_eq!(point.to_string(), "40.000000,-75.000001");
    }

    #[test]
    fn grid_point_tolerance_is_per_axis() {
        let a = GridPoint::from_degrees(40.000_001, -75.000_002);
        let b = GridPoint::from_degrees(40.000_000, -75.000_001);
        assert!(!a.matches(b, 0));
        assert!(a.matches(b, 1));

        let far = GridPoint::from_degrees(40.000_003, -75.000_001);
        assert!(!b.matches(far, 1));
    }

    #[test]
    fn deserializes_decoder_aliases() {
        let json = r#"{
            "from": "KD2ABC-11",
            "timestamp": 1700000000,
            "latitude": 40.5,
            "longitude": -75.5,
            "path": ["WIDE1-1", "qAR", "N0CALL"],
            "raw": "KD2ABC-11>APRS,WIDE1-1,qAR,N0CALL:!4030.00N/07530.00WO"
        }"#;
        let report: PositionReport = serde_json::from_str(json).expect("parse report");
        assert_eq!(report.station_id, "KD2ABC-11");
        assert_eq!(
            report.observed_at.map(|ts| ts.timestamp()),
            Some(1_700_000_000)
        );
        assert_eq!(report.q_construct(), Some("qAR"));
        assert!(report.raw_payload.starts_with("KD2ABC-11>"));
        assert_eq!(report.altitude, None);
    }

    #[test]
    fn record_requires_a_position() {
        let arrival = DateTime::from_timestamp(1_700_000_000, 0).expect("valid ts");
        assert!(HistoryRecord::from_report(&PositionReport::new("N0CALL"), arrival).is_none());

        let report = PositionReport::new("N0CALL").at(40.5, -75.5).with_altitude(120.0);
        let record = HistoryRecord::from_report(&report, arrival).expect("record");
        assert_eq!(record.arrival_at, arrival);
        assert_eq!(record.altitude, Some(120.0));
    }
}
