//! The structured diff attached to each UPDATE delta event, and the event
//! log entries themselves.

use crate::attributes::TargetState;
use crate::geo::heading_delta;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionDelta {
    pub from: (f64, f64, f64),
    pub to: (f64, f64, f64),
    pub d_lon: f64,
    pub d_lat: f64,
    pub d_alt: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeadingDelta {
    pub from: f64,
    pub to: f64,
    /// Shortest-arc signed difference, normalised to (-180, 180].
    pub delta: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedDelta {
    pub from: f64,
    pub to: f64,
    pub delta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredDiff {
    pub position: PositionDelta,
    pub heading: HeadingDelta,
    pub speed: SpeedDelta,
    pub changed_fields: Vec<String>,
}

/// Diffs two successive published states. Always returns a full diff —
/// whether it represents a real change or a coalesced no-op put is
/// recorded in `changed_fields`, which the caller/subscriber can use to
/// distinguish the two without the cache having to suppress the event.
pub fn compute_delta(old: &TargetState, new: &TargetState) -> StructuredDiff {
    let mut changed_fields = Vec::new();
    if old.position.lon != new.position.lon
        || old.position.lat != new.position.lat
        || old.position.alt != new.position.alt
    {
        changed_fields.push("position".to_string());
    }
    if old.heading != new.heading {
        changed_fields.push("heading".to_string());
    }
    if old.speed != new.speed {
        changed_fields.push("speed".to_string());
    }

    StructuredDiff {
        position: PositionDelta {
            from: (old.position.lon, old.position.lat, old.position.alt),
            to: (new.position.lon, new.position.lat, new.position.alt),
            d_lon: new.position.lon - old.position.lon,
            d_lat: new.position.lat - old.position.lat,
            d_alt: new.position.alt - old.position.alt,
        },
        heading: HeadingDelta {
            from: old.heading,
            to: new.heading,
            delta: heading_delta(old.heading, new.heading),
        },
        speed: SpeedDelta {
            from: old.speed,
            to: new.speed,
            delta: new.speed - old.speed,
        },
        changed_fields,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeltaPayload {
    Update { diff: StructuredDiff },
    Delete { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaEvent {
    pub target_id: Uuid,
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: DeltaPayload,
}

impl DeltaEvent {
    pub fn update(target_id: Uuid, version: u64, diff: StructuredDiff) -> Self {
        Self {
            target_id,
            version,
            timestamp: Utc::now(),
            payload: DeltaPayload::Update { diff },
        }
    }

    pub fn delete(target_id: Uuid, version: u64, reason: impl Into<String>) -> Self {
        Self {
            target_id,
            version,
            timestamp: Utc::now(),
            payload: DeltaPayload::Delete {
                reason: reason.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPosition;

    fn state(lon: f64, heading: f64, speed: f64) -> TargetState {
        TargetState {
            timestamp: Utc::now(),
            position: GeoPosition::new(lon, 39.9, 5000.0),
            heading,
            speed,
            pitch: None,
            roll: None,
        }
    }

    #[test]
    fn heading_diff_normalises_through_wraparound() {
        let diff = compute_delta(&state(0.0, 350.0, 100.0), &state(0.0, 10.0, 100.0));
        assert_eq!(diff.heading.delta, 20.0);
    }

    #[test]
    fn identical_states_yield_no_changed_fields() {
        let s = state(1.0, 90.0, 100.0);
        let diff = compute_delta(&s, &s);
        assert!(diff.changed_fields.is_empty());
    }

    #[test]
    fn position_change_is_flagged() {
        let diff = compute_delta(&state(1.0, 90.0, 100.0), &state(2.0, 90.0, 100.0));
        assert_eq!(diff.changed_fields, vec!["position".to_string()]);
    }
}
