//! Report validation.
//!
//! Rules run in a fixed order and stop at the first failure, so the logged
//! reason is always the earliest rule that fired:
//!
//! 1. **Relay path**: q construct allowlist, banned origin hop.
//! 2. **Coordinates present**.
//! 3. **Null island**: both axes strictly within ±0.1°, a GPS fix failure.
//! 4. **Altitude**: below the configured floor, or missing when required.
//! 5. **Comment blocklist**: precompiled alternation.
//! 6. **Station blocklist**.
//! 7. **Relay replay**: for feeds known to replay stale fixes, the position
//!    must differ from the station's latest stored one. Needs one store
//!    read; a failed read counts as "no match".
//!
//! Rules 1–6 are pure ([`validate`]); rule 7 lives in
//! [`validate_with_history`].

use std::fmt;

use serde::Serialize;

use crate::config::FilterConfig;
use crate::error::ErrorCode;
use crate::model::PositionReport;
use crate::store::HistoryStore;

/// Half-width of the box around (0, 0) treated as a failed fix, in degrees.
pub const NULL_ISLAND_RADIUS_DEG: f64 = 0.1;

/// Why a report was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    RelayNotAllowed,
    OriginBanned,
    MissingCoordinates,
    NearZeroCoordinates,
    InvalidAltitude,
    BannedComment,
    BannedStation,
    RelayReplay,
}

impl RejectReason {
    /// Stable snake-case name used in logs and JSON output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RelayNotAllowed => "relay_not_allowed",
            Self::OriginBanned => "origin_banned",
            Self::MissingCoordinates => "missing_coordinates",
            Self::NearZeroCoordinates => "near_zero_coordinates",
            Self::InvalidAltitude => "invalid_altitude",
            Self::BannedComment => "banned_comment",
            Self::BannedStation => "banned_station",
            Self::RelayReplay => "relay_replay",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Outcome of validating one report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(RejectReason),
}

impl Verdict {
    #[must_use]
    pub const fn is_accept(self) -> bool {
        matches!(self, Self::Accept)
    }

    /// The rejection reason, if any.
    #[must_use]
    pub const fn reason(self) -> Option<RejectReason> {
        match self {
            Self::Accept => None,
            Self::Reject(reason) => Some(reason),
        }
    }
}

/// Apply rules 1–6 to `report`. Pure: no I/O, no logging.
#[must_use]
pub fn validate(report: &PositionReport, filter: &FilterConfig) -> Verdict {
    match first_failure(report, filter) {
        Some(reason) => Verdict::Reject(reason),
        None => Verdict::Accept,
    }
}

fn first_failure(report: &PositionReport, filter: &FilterConfig) -> Option<RejectReason> {
    if !filter.allowed_relay_tags.is_empty() {
        let allowed = report
            .q_construct()
            .is_some_and(|q| filter.allowed_relay_tags.contains(q));
        if !allowed {
            return Some(RejectReason::RelayNotAllowed);
        }
    }

    if report
        .origin()
        .is_some_and(|origin| filter.banned_origins.contains(origin))
    {
        return Some(RejectReason::OriginBanned);
    }

    let Some((lat, lon)) = report.position() else {
        return Some(RejectReason::MissingCoordinates);
    };

    if lat.abs() < NULL_ISLAND_RADIUS_DEG && lon.abs() < NULL_ISLAND_RADIUS_DEG {
        return Some(RejectReason::NearZeroCoordinates);
    }

    match report.altitude {
        Some(altitude) => {
            if filter.min_altitude.is_some_and(|floor| altitude < floor) || altitude.is_nan() {
                return Some(RejectReason::InvalidAltitude);
            }
        }
        None if filter.require_altitude => return Some(RejectReason::InvalidAltitude),
        None => {}
    }

    let banned_comment = match (&filter.banned_comments, &report.comment) {
        (Some(matcher), Some(comment)) => matcher.is_match(comment),
        _ => false,
    };
    if banned_comment {
        return Some(RejectReason::BannedComment);
    }

    if filter.banned_stations.contains(&report.station_id) {
        return Some(RejectReason::BannedStation);
    }

    None
}

/// Apply rules 1–7. Rule 7 runs only when rules 1–6 accept and the report
/// arrived through one of the strict replay relays.
///
/// A store error during the replay lookup is logged and treated as "no
/// match": storage trouble never blocks ingestion.
pub fn validate_with_history<S: HistoryStore + ?Sized>(
    report: &PositionReport,
    filter: &FilterConfig,
    store: &S,
) -> Verdict {
    let verdict = validate(report, filter);
    if !verdict.is_accept() {
        return verdict;
    }

    let strict = report
        .q_construct()
        .is_some_and(|q| filter.strict_replay_tags.contains(q));
    if !strict {
        return Verdict::Accept;
    }

    let Some(point) = report.grid_point() else {
        return Verdict::Accept;
    };

    match store.find_latest_position(&report.station_id) {
        Ok(Some(latest)) if latest.matches(point, filter.dedup_tolerance_e6) => {
            Verdict::Reject(RejectReason::RelayReplay)
        }
        Ok(_) => Verdict::Accept,
        Err(error) => {
            tracing::warn!(
                code = %ErrorCode::StoreReadError,
                station = %report.station_id,
                error = %error,
                "replay check failed, accepting report"
            );
            Verdict::Accept
        }
    }
}
