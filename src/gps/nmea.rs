// src/gps/nmea.rs
//! NMEA RMC sentence decoding
//!
//! `decode` is a pure function: one line in, one fix or one rejection out.
//! It keeps no state between calls and can be called from any task.

use super::data::PositionFix;
use chrono::{NaiveDate, NaiveTime};
use thiserror::Error;

/// Knots to kilometres per hour.
pub const KNOTS_TO_KMH: f64 = 1.852;

/// Minimum number of comma separated fields in an RMC sentence.
pub const MIN_FIELDS: usize = 12;

/// Status marker for an active (valid) fix. Anything else, including the
/// void marker `V`, is not a fix.
const STATUS_ACTIVE: &str = "A";

/// Sentence identifiers accepted by the decoder (GPS and multi-GNSS talkers).
const RMC_SENTENCES: [&str; 2] = ["$GPRMC", "$GNRMC"];

/// Two-digit years at or above this pivot belong to the 1900s (GPS epoch 1980).
const CENTURY_PIVOT: u32 = 80;

/// Why a line did not produce a fix.
///
/// These are per-line outcomes, not connection failures. `FixNotValid` in
/// particular is what a receiver without satellite lock normally sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("malformed sentence")]
    MalformedSentence,
    #[error("fix not valid")]
    FixNotValid,
    #[error("bad coordinate")]
    BadCoordinate,
    #[error("bad timestamp")]
    BadTimestamp,
}

#[derive(Debug, Clone, Copy)]
enum Axis {
    Latitude,
    Longitude,
}

impl Axis {
    fn max_degrees(self) -> f64 {
        match self {
            Axis::Latitude => 90.0,
            Axis::Longitude => 180.0,
        }
    }

    /// Sign for a hemisphere indicator, or `None` if it does not belong to this axis.
    fn sign(self, hemisphere: &str) -> Option<f64> {
        match (self, hemisphere) {
            (Axis::Latitude, "N") | (Axis::Longitude, "E") => Some(1.0),
            (Axis::Latitude, "S") | (Axis::Longitude, "W") => Some(-1.0),
            _ => None,
        }
    }
}

/// Decode a raw line as received from the socket.
pub fn decode_raw(line: &[u8]) -> Result<PositionFix, Rejection> {
    let line = std::str::from_utf8(line).map_err(|_| Rejection::MalformedSentence)?;
    decode(line)
}

/// Decode a single RMC sentence into a position fix.
pub fn decode(line: &str) -> Result<PositionFix, Rejection> {
    let parts: Vec<&str> = line.trim().split(',').collect();

    if parts.len() < MIN_FIELDS || !RMC_SENTENCES.contains(&parts[0]) {
        return Err(Rejection::MalformedSentence);
    }

    // Status (field 2)
    if parts[2] != STATUS_ACTIVE {
        return Err(Rejection::FixNotValid);
    }

    // Latitude (fields 3 and 4), longitude (fields 5 and 6)
    let latitude = parse_coordinate(parts[3], parts[4], Axis::Latitude)?;
    let longitude = parse_coordinate(parts[5], parts[6], Axis::Longitude)?;

    // Speed over ground in knots (field 7)
    let speed_kmh = parse_speed(parts[7])?;

    // Course over ground in degrees (field 8), often empty when stationary
    let course = parts[8].parse::<f64>().ok().filter(|c| c.is_finite());

    // Time (field 1) and date (field 9)
    let time_utc = parse_time(parts[1])?;
    let date_utc = parse_date(parts[9])?;

    Ok(PositionFix {
        latitude,
        longitude,
        speed_kmh,
        course,
        time_utc,
        date_utc,
        valid: true,
    })
}

/// Parse a `(d)ddmm.mmmm` field and its hemisphere into signed decimal degrees.
///
/// The last two digits before the decimal point are whole minutes, everything
/// in front of them is degrees.
fn parse_coordinate(value: &str, hemisphere: &str, axis: Axis) -> Result<f64, Rejection> {
    let sign = axis.sign(hemisphere).ok_or(Rejection::BadCoordinate)?;

    let point = value.find('.').unwrap_or(value.len());
    if point < 3 || !value.is_ascii() {
        return Err(Rejection::BadCoordinate);
    }

    let (degrees, minutes) = value.split_at(point - 2);
    if !degrees.bytes().all(|b| b.is_ascii_digit())
        || !minutes[..2].bytes().all(|b| b.is_ascii_digit())
    {
        return Err(Rejection::BadCoordinate);
    }

    let degrees = degrees
        .parse::<u16>()
        .map_err(|_| Rejection::BadCoordinate)? as f64;
    let minutes = minutes
        .parse::<f64>()
        .map_err(|_| Rejection::BadCoordinate)?;

    if !(0.0..60.0).contains(&minutes) {
        return Err(Rejection::BadCoordinate);
    }

    let decimal = degrees + minutes / 60.0;
    if decimal > axis.max_degrees() {
        return Err(Rejection::BadCoordinate);
    }

    Ok(sign * decimal)
}

fn parse_speed(value: &str) -> Result<f64, Rejection> {
    if value.is_empty() {
        return Ok(0.0);
    }

    match value.parse::<f64>() {
        Ok(knots) if knots.is_finite() && knots >= 0.0 => Ok(knots * KNOTS_TO_KMH),
        _ => Err(Rejection::MalformedSentence),
    }
}

/// Split the first six characters of a field into three two-digit numbers.
fn six_digits(value: &str) -> Result<(u32, u32, u32), Rejection> {
    let digits = value.get(..6).ok_or(Rejection::BadTimestamp)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Rejection::BadTimestamp);
    }

    let pair = |i: usize| digits[i..i + 2].parse::<u32>().map_err(|_| Rejection::BadTimestamp);
    Ok((pair(0)?, pair(2)?, pair(4)?))
}

/// `hhmmss`, optionally followed by fractional seconds which are ignored.
///
/// Second 60 is a leap second and maps to chrono's leap representation.
fn parse_time(value: &str) -> Result<NaiveTime, Rejection> {
    let (hours, minutes, seconds) = six_digits(value)?;
    let time = match seconds {
        60 => NaiveTime::from_hms_milli_opt(hours, minutes, 59, 1000),
        _ => NaiveTime::from_hms_opt(hours, minutes, seconds),
    };
    time.ok_or(Rejection::BadTimestamp)
}

/// `ddmmyy`
fn parse_date(value: &str) -> Result<NaiveDate, Rejection> {
    let (day, month, yy) = six_digits(value)?;
    let year = if yy >= CENTURY_PIVOT { 1900 + yy } else { 2000 + yy };
    NaiveDate::from_ymd_opt(year as i32, month, day).ok_or(Rejection::BadTimestamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MUNICH: &str = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";

    /// Render decimal degrees the way a receiver would put them on the wire.
    fn encode_coordinate(value: f64, axis: Axis) -> (String, &'static str) {
        let abs = value.abs();
        let degrees = abs.trunc();
        let minutes = (abs - degrees) * 60.0;
        match axis {
            Axis::Latitude => (
                format!("{:02}{:010.7}", degrees as u32, minutes),
                if value < 0.0 { "S" } else { "N" },
            ),
            Axis::Longitude => (
                format!("{:03}{:010.7}", degrees as u32, minutes),
                if value < 0.0 { "W" } else { "E" },
            ),
        }
    }

    fn rmc(lat: f64, lon: f64) -> String {
        let (lat, ns) = encode_coordinate(lat, Axis::Latitude);
        let (lon, ew) = encode_coordinate(lon, Axis::Longitude);
        format!("$GPRMC,081500,A,{},{},{},{},005.0,270.0,010624,,*00", lat, ns, lon, ew)
    }

    #[test]
    fn test_gprmc_decoding() {
        let fix = decode(MUNICH).unwrap();

        assert!((fix.latitude - 48.1173).abs() < 1e-4);
        assert!((fix.longitude - 11.516_667).abs() < 1e-4);
        assert!((fix.speed_kmh - 41.4848).abs() < 1e-3);
        assert_eq!(fix.course, Some(84.4));
        assert_eq!(fix.time_utc, NaiveTime::from_hms_opt(12, 35, 19).unwrap());
        assert_eq!(fix.date_utc, NaiveDate::from_ymd_opt(1994, 3, 23).unwrap());
        assert!(fix.valid);
    }

    #[test]
    fn test_void_fix_is_rejected() {
        let void = "$GPRMC,123519,V,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*7D";
        assert_eq!(decode(void), Err(Rejection::FixNotValid));

        let empty_status = "$GPRMC,123519,,,,,,,,230394,,*00";
        assert_eq!(decode(empty_status), Err(Rejection::FixNotValid));
    }

    #[test]
    fn test_other_sentences_are_malformed() {
        let gga = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";
        assert_eq!(decode(gga), Err(Rejection::MalformedSentence));
        assert_eq!(decode("$INVALID,123,456"), Err(Rejection::MalformedSentence));
        assert_eq!(decode(""), Err(Rejection::MalformedSentence));
    }

    #[test]
    fn test_too_few_fields() {
        let short = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394";
        assert_eq!(decode(short), Err(Rejection::MalformedSentence));
    }

    #[test]
    fn test_gnrmc_talker_and_trailing_cr() {
        let line = "$GNRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*74\r";
        assert!(decode(line).is_ok());
        assert!(decode_raw(line.as_bytes()).is_ok());
    }

    #[test]
    fn test_southern_and_western_hemispheres() {
        let line = "$GPRMC,000000,A,3351.600,S,15112.600,W,000.0,,010124,,*00";
        let fix = decode(line).unwrap();

        assert!((fix.latitude + 33.86).abs() < 1e-9);
        assert!((fix.longitude + 151.21).abs() < 1e-9);
        assert_eq!(fix.speed_kmh, 0.0);
        assert_eq!(fix.course, None);
    }

    #[test]
    fn test_bad_coordinates() {
        let cases = [
            "$GPRMC,123519,A,48x7.038,N,01131.000,E,022.4,084.4,230394,,*00",
            "$GPRMC,123519,A,4807.038,X,01131.000,E,022.4,084.4,230394,,*00",
            "$GPRMC,123519,A,4807.038,N,01131.000,N,022.4,084.4,230394,,*00",
            "$GPRMC,123519,A,,N,01131.000,E,022.4,084.4,230394,,*00",
            "$GPRMC,123519,A,07.038,N,01131.000,E,022.4,084.4,230394,,*00",
            "$GPRMC,123519,A,4875.000,N,01131.000,E,022.4,084.4,230394,,*00",
            "$GPRMC,123519,A,9100.000,N,01131.000,E,022.4,084.4,230394,,*00",
            "$GPRMC,123519,A,4807.038,N,18100.000,E,022.4,084.4,230394,,*00",
        ];

        for line in cases {
            assert_eq!(decode(line), Err(Rejection::BadCoordinate), "{}", line);
        }
    }

    #[test]
    fn test_bad_timestamps() {
        let cases = [
            "$GPRMC,1235,A,4807.038,N,01131.000,E,022.4,084.4,230394,,*00",
            "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,2303,,*00",
            "$GPRMC,253519,A,4807.038,N,01131.000,E,022.4,084.4,230394,,*00",
            "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,310294,,*00",
            "$GPRMC,12a519,A,4807.038,N,01131.000,E,022.4,084.4,230394,,*00",
        ];

        for line in cases {
            assert_eq!(decode(line), Err(Rejection::BadTimestamp), "{}", line);
        }
    }

    #[test]
    fn test_leap_second() {
        let line = "$GPRMC,235960,A,4807.038,N,01131.000,E,000.0,,311216,,*00";
        let fix = decode(line).unwrap();

        assert_eq!(fix.time_utc, NaiveTime::from_hms_milli_opt(23, 59, 59, 1000).unwrap());
        assert_eq!(fix.date_utc, NaiveDate::from_ymd_opt(2016, 12, 31).unwrap());

        let next = decode("$GPRMC,000000,A,4807.038,N,01131.000,E,000.0,,010117,,*00").unwrap();
        assert!(fix.timestamp() < next.timestamp());

        // Only second 60 is special
        let line = "$GPRMC,235961,A,4807.038,N,01131.000,E,000.0,,311216,,*00";
        assert_eq!(decode(line), Err(Rejection::BadTimestamp));
    }

    #[test]
    fn test_fractional_seconds_and_recent_year() {
        let line = "$GPRMC,071502.00,A,5130.000,N,00007.500,W,001.0,,190326,,*00";
        let fix = decode(line).unwrap();

        assert_eq!(fix.time_utc, NaiveTime::from_hms_opt(7, 15, 2).unwrap());
        assert_eq!(fix.date_utc, NaiveDate::from_ymd_opt(2026, 3, 19).unwrap());
    }

    #[test]
    fn test_negative_speed_is_malformed() {
        let line = "$GPRMC,123519,A,4807.038,N,01131.000,E,-1.0,084.4,230394,,*00";
        assert_eq!(decode(line), Err(Rejection::MalformedSentence));
    }

    #[test]
    fn test_coordinate_round_trip() {
        let points = [
            (48.1173, 11.5167),
            (-33.8688, 151.2093),
            (40.7128, -74.006),
            (-0.5, -0.25),
            (89.9, 179.9),
        ];

        for (lat, lon) in points {
            let fix = decode(&rmc(lat, lon)).unwrap();
            assert!((fix.latitude - lat).abs() < 1e-5, "lat {} -> {}", lat, fix.latitude);
            assert!((fix.longitude - lon).abs() < 1e-5, "lon {} -> {}", lon, fix.longitude);
        }
    }

    #[test]
    fn test_decoded_fixes_stay_in_range() {
        for lat_step in -9..=9 {
            for lon_step in -18..=18 {
                let lat = lat_step as f64 * 9.99;
                let lon = lon_step as f64 * 9.99;
                let fix = decode(&rmc(lat, lon)).unwrap();

                assert!((-90.0..=90.0).contains(&fix.latitude));
                assert!((-180.0..=180.0).contains(&fix.longitude));
                assert!(fix.speed_kmh >= 0.0);
            }
        }
    }
}
