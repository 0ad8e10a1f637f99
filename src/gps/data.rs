// src/gps/data.rs
//! Position fix produced by the sentence decoder

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// A validated position fix decoded from a single RMC sentence.
///
/// Only the decoder builds these, and only from sentences whose status
/// field reported an active fix, so `valid` is always `true` for fixes that
/// came off the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub latitude: f64,       // decimal degrees, south negative
    pub longitude: f64,      // decimal degrees, west negative
    pub speed_kmh: f64,      // converted from knots
    pub course: Option<f64>, // degrees true, when reported
    pub time_utc: NaiveTime,
    pub date_utc: NaiveDate,
    pub valid: bool,
}

impl PositionFix {
    /// Date and time of the fix as a single UTC instant.
    pub fn timestamp(&self) -> DateTime<Utc> {
        NaiveDateTime::new(self.date_utc, self.time_utc).and_utc()
    }

    /// Latitude/longitude pair, in that order.
    pub fn coordinates(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }

    /// Format a coordinate for display
    pub fn format_coordinate(coord: f64) -> String {
        format!("{:>12.6}°", coord)
    }
}
