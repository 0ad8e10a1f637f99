// src/odometer.rs
//! Incremental great-circle distance accumulation
//!
//! [`apply`] is a pure read-modify-write step: it takes an entity's prior
//! [`TrackingState`] and a new fix, and returns the next state together with
//! the distance covered since the previous fix. Whoever stores the state must
//! run at most one `apply` per entity at a time and feed fixes in time order.

use crate::gps::PositionFix;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::trace;

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Opaque key of a tracked subject, supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for EntityId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// Per-entity odometer state, owned by the storage layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingState {
    pub last_fix: Option<PositionFix>,
    pub cumulative_distance_km: f64,
}

impl TrackingState {
    /// State for an entity seen before, e.g. restored from persistent storage.
    pub fn resume(last_fix: PositionFix, cumulative_distance_km: f64) -> Self {
        Self {
            last_fix: Some(last_fix),
            cumulative_distance_km,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AccumulateError {
    /// The new fix is older than the last one applied for this entity.
    #[error("out-of-order fix for {entity}: received {received}, last applied {last}")]
    OutOfOrderFix {
        entity: EntityId,
        last: DateTime<Utc>,
        received: DateTime<Utc>,
    },
}

/// Great-circle distance in kilometres between two `(lat, lon)` pairs in degrees.
pub fn haversine_km(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lon1) = from;
    let (lat2, lon2) = to;

    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    // Rounding can push `a` a hair past 1 for near-antipodal points
    let a = a.clamp(0.0, 1.0);

    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Apply a new fix to an entity's prior state.
///
/// Returns the updated state and the distance delta in kilometres. The first
/// fix for an entity contributes no distance.
pub fn apply(
    entity: &EntityId,
    fix: PositionFix,
    prior: &TrackingState,
) -> Result<(TrackingState, f64), AccumulateError> {
    let delta_km = match &prior.last_fix {
        None => 0.0,
        Some(last) => {
            if fix.timestamp() < last.timestamp() {
                return Err(AccumulateError::OutOfOrderFix {
                    entity: entity.clone(),
                    last: last.timestamp(),
                    received: fix.timestamp(),
                });
            }
            haversine_km(last.coordinates(), fix.coordinates())
        }
    };

    let cumulative_distance_km = prior.cumulative_distance_km + delta_km;
    trace!(
        entity = %entity,
        delta_km,
        cumulative_distance_km,
        "Applied fix"
    );

    Ok((
        TrackingState {
            last_fix: Some(fix),
            cumulative_distance_km,
        },
        delta_km,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn fix(lat: f64, lon: f64, second: u32) -> PositionFix {
        PositionFix {
            latitude: lat,
            longitude: lon,
            speed_kmh: 0.0,
            course: None,
            time_utc: NaiveTime::from_hms_opt(12, 0, second).unwrap(),
            date_utc: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            valid: true,
        }
    }

    #[test]
    fn test_first_fix_adds_nothing() {
        let entity = EntityId::from(7u64);
        let (state, delta) = apply(&entity, fix(48.1173, 11.5167, 0), &TrackingState::default()).unwrap();

        assert_eq!(delta, 0.0);
        assert_eq!(state.cumulative_distance_km, 0.0);
        assert!(state.last_fix.is_some());

        let (state, delta) = apply(&entity, fix(48.1173, 11.5167, 0), &state).unwrap();
        assert_eq!(delta, 0.0);
        assert_eq!(state.cumulative_distance_km, 0.0);
    }

    #[test]
    fn test_first_fix_keeps_restored_total() {
        let prior = TrackingState {
            last_fix: None,
            cumulative_distance_km: 12.5,
        };
        let (state, delta) = apply(&"car".into(), fix(1.0, 1.0, 0), &prior).unwrap();

        assert_eq!(delta, 0.0);
        assert_eq!(state.cumulative_distance_km, 12.5);
    }

    #[test]
    fn test_hundredth_of_a_degree_latitude() {
        let entity = EntityId::from("bike");
        let (state, _) = apply(&entity, fix(48.1173, 11.5167, 0), &TrackingState::default()).unwrap();
        let (state, delta) = apply(&entity, fix(48.1273, 11.5167, 1), &state).unwrap();

        assert!((delta - 1.1119).abs() < 1e-3, "got {}", delta);
        assert_eq!(state.cumulative_distance_km, delta);
    }

    #[test]
    fn test_distance_symmetry() {
        let a = (45.0, -122.0);
        let b = (46.0, -121.0);

        assert!((haversine_km(a, b) - haversine_km(b, a)).abs() < 1e-12);
    }

    #[test]
    fn test_coincident_and_antipodal_points() {
        assert_eq!(haversine_km((10.0, 20.0), (10.0, 20.0)), 0.0);

        let half_circumference = std::f64::consts::PI * EARTH_RADIUS_KM;
        let antipodal = haversine_km((0.0, 0.0), (0.0, 180.0));
        assert!((antipodal - half_circumference).abs() < 1e-6);

        let poles = haversine_km((90.0, 0.0), (-90.0, 0.0));
        assert!(poles.is_finite());
        assert!((poles - half_circumference).abs() < 1e-6);
    }

    #[test]
    fn test_cumulative_is_sum_of_deltas() {
        let entity = EntityId::from("walker");
        let a = fix(51.5007, -0.1246, 0);
        let b = fix(51.5033, -0.1196, 10);
        let c = fix(51.5081, -0.0759, 20);

        let (state_a, _) = apply(&entity, a.clone(), &TrackingState::default()).unwrap();
        let (state_b, delta_ab) = apply(&entity, b.clone(), &state_a).unwrap();
        let (state_c, delta_bc) = apply(&entity, c.clone(), &state_b).unwrap();

        assert!((delta_ab - haversine_km(a.coordinates(), b.coordinates())).abs() < 1e-12);
        let expected = state_a.cumulative_distance_km + delta_ab + delta_bc;
        assert!((state_c.cumulative_distance_km - expected).abs() <= 1e-9 * expected);
        assert_eq!(state_c.last_fix, Some(c));
    }

    #[test]
    fn test_out_of_order_fix_is_flagged() {
        let entity = EntityId::from(3u64);
        let (state, _) = apply(&entity, fix(0.0, 0.0, 30), &TrackingState::default()).unwrap();

        let err = apply(&entity, fix(0.0, 0.1, 10), &state).unwrap_err();
        match err {
            AccumulateError::OutOfOrderFix { entity: e, last, received } => {
                assert_eq!(e, entity);
                assert!(received < last);
            }
        }

        // Same timestamp is not out of order
        assert!(apply(&entity, fix(0.0, 0.1, 30), &state).is_ok());
    }

    #[test]
    fn test_entity_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&EntityId::from(42u64)).unwrap();
        assert_eq!(json, "\"42\"");
    }
}
