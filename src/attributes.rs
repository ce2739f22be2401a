//! Target state and attribute data model: the immutable published facts
//! about a target at a point in time, and the (mostly-string) metadata
//! used by attribute/platform rules.

use crate::geo::GeoPosition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlatformType {
    Fighter,
    Bomber,
    Awacs,
    Ew,
    Tanker,
    Transport,
    Uav,
    Helicopter,
    Unknown,
}

/// A single timestamped observation. Immutable once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetState {
    pub timestamp: DateTime<Utc>,
    pub position: GeoPosition,
    /// Degrees, 0..360, with 0/360 equivalence.
    pub heading: f64,
    /// m/s, >= 0.
    pub speed: f64,
    pub pitch: Option<f64>,
    pub roll: Option<f64>,
}

impl Default for PlatformType {
    fn default() -> Self {
        PlatformType::Unknown
    }
}

/// All attribute fields are strings; comparison is exact equality.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetAttributes {
    pub platform_type: PlatformType,
    pub nation: Option<String>,
    pub alliance: Option<String>,
    pub theatre: Option<String>,
    pub airport: Option<String>,
    pub squadron: Option<String>,
    pub mission: Option<String>,
}

/// Motion features derived from centred finite differences; require both
/// neighbours, so the first and last state in a track never have them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionFeatures {
    pub acceleration_mps2: f64,
    pub turn_rate_dps: f64,
    pub climb_rate_mps: f64,
    pub maneuvering: bool,
}

impl MotionFeatures {
    pub fn compute(prev: &TargetState, next: &TargetState) -> Self {
        let dt = (next.timestamp - prev.timestamp).num_milliseconds() as f64 / 1000.0;
        if dt <= 0.0 {
            return Self {
                acceleration_mps2: 0.0,
                turn_rate_dps: 0.0,
                climb_rate_mps: 0.0,
                maneuvering: false,
            };
        }
        let acceleration = (next.speed - prev.speed) / dt;
        let turn_rate = crate::geo::heading_delta(prev.heading, next.heading) / dt;
        let climb_rate = (next.position.alt - prev.position.alt) / dt;
        let maneuvering = turn_rate.abs() > 5.0 || acceleration.abs() > 2.0;
        Self {
            acceleration_mps2: acceleration,
            turn_rate_dps: turn_rate,
            climb_rate_mps: climb_rate,
            maneuvering,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(secs: i64, heading: f64, speed: f64, alt: f64) -> TargetState {
        TargetState {
            timestamp: DateTime::from_timestamp(secs, 0).unwrap(),
            position: GeoPosition::new(0.0, 0.0, alt),
            heading,
            speed,
            pitch: None,
            roll: None,
        }
    }

    #[test]
    fn maneuvering_flag_trips_on_turn_rate() {
        let a = state(0, 0.0, 100.0, 5000.0);
        let b = state(1, 10.0, 100.0, 5000.0);
        let f = MotionFeatures::compute(&a, &b);
        assert!(f.maneuvering);
        assert!((f.turn_rate_dps - 10.0).abs() < 1e-6);
    }

    #[test]
    fn steady_state_is_not_maneuvering() {
        let a = state(0, 90.0, 100.0, 5000.0);
        let b = state(10, 90.0, 100.0, 5000.0);
        let f = MotionFeatures::compute(&a, &b);
        assert!(!f.maneuvering);
        assert_eq!(f.acceleration_mps2, 0.0);
    }

    #[test]
    fn default_platform_type_is_unknown() {
        let attrs = TargetAttributes::default();
        assert_eq!(attrs.platform_type, PlatformType::Unknown);
    }
}
