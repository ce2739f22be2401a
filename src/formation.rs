//! The output record of a recognition run: a set of targets whose
//! pairwise rule evaluations persisted across a sampling window, with
//! spatial and motion summaries attached.

use crate::attributes::{PlatformType, TargetAttributes, TargetState};
use crate::geo::{AltitudeLayer, circular_mean_std, linear_mean_std};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormationMember {
    pub target_id: Uuid,
    pub attributes: TargetAttributes,
    pub joined_at: DateTime<Utc>,
    /// The member's states within the recognition window, used to build
    /// the formation's spatial and motion summaries.
    pub track_slice: Vec<TargetState>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpatialSummary {
    pub centre_lon: f64,
    pub centre_lat: f64,
    pub bounding_box: BoundingBox,
    /// Square kilometres.
    pub coverage_area_km2: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MotionSummary {
    pub mean_speed: f64,
    pub std_speed: f64,
    pub mean_heading: f64,
    pub std_heading: f64,
    pub altitude_layer: AltitudeLayer,
    /// Scalar in [0, 1]; derived from heading and speed spread, higher is
    /// tighter.
    pub cohesion: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulePassRate {
    pub rule_name: String,
    pub pass_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Formation {
    pub id: Uuid,
    /// Derived from the member platform-type multiset; see
    /// `classify_formation_type`.
    pub formation_type: String,
    pub confidence: f64,
    pub members: Vec<FormationMember>,
    pub time_range: (DateTime<Utc>, DateTime<Utc>),
    pub created_at: DateTime<Utc>,
    pub spatial_summary: SpatialSummary,
    pub motion_summary: MotionSummary,
    pub applied_rules: Vec<String>,
    pub rule_pass_rates: Vec<RulePassRate>,
    /// Edge weight per member pair, if the caller wants the underlying
    /// coordination graph rather than just the summary.
    pub coordination_graph: Option<HashMap<(Uuid, Uuid), f64>>,
}

/// Builds the spatial summary: bounding box over all member states in the
/// window, centre as the box midpoint, coverage area via the same
/// equirectangular projection used for pairwise distance.
pub fn spatial_summary(members: &[FormationMember]) -> SpatialSummary {
    let mut min_lon = f64::MAX;
    let mut max_lon = f64::MIN;
    let mut min_lat = f64::MAX;
    let mut max_lat = f64::MIN;

    for m in members {
        for s in &m.track_slice {
            min_lon = min_lon.min(s.position.lon);
            max_lon = max_lon.max(s.position.lon);
            min_lat = min_lat.min(s.position.lat);
            max_lat = max_lat.max(s.position.lat);
        }
    }

    let centre_lon = (min_lon + max_lon) / 2.0;
    let centre_lat = (min_lat + max_lat) / 2.0;
    let coverage_area_km2 = ((max_lon - min_lon) * 111_320.0 * centre_lat.to_radians().cos())
        * ((max_lat - min_lat) * 110_540.0)
        / 1_000_000.0;

    SpatialSummary {
        centre_lon,
        centre_lat,
        bounding_box: BoundingBox { min_lon, min_lat, max_lon, max_lat },
        coverage_area_km2: coverage_area_km2.abs(),
    }
}

/// Builds the motion summary: linear mean/std of speed, circular mean/std
/// of heading, altitude layer from mean altitude.
pub fn motion_summary(members: &[FormationMember]) -> MotionSummary {
    let mut speeds = Vec::new();
    let mut headings = Vec::new();
    let mut altitudes = Vec::new();

    for m in members {
        for s in &m.track_slice {
            speeds.push(s.speed);
            headings.push(s.heading);
            altitudes.push(s.position.alt);
        }
    }

    let (mean_speed, std_speed) = linear_mean_std(&speeds);
    let (mean_heading, std_heading) = circular_mean_std(&headings);
    let (mean_alt, _) = linear_mean_std(&altitudes);

    // Tighter heading/speed spread yields higher cohesion; both terms are
    // normalised against generous spread bounds and averaged.
    let heading_cohesion = (1.0 - std_heading / 90.0).clamp(0.0, 1.0);
    let speed_cohesion = (1.0 - std_speed / 50.0).clamp(0.0, 1.0);
    let cohesion = (heading_cohesion + speed_cohesion) / 2.0;

    MotionSummary {
        mean_speed,
        std_speed,
        mean_heading,
        std_heading,
        altitude_layer: AltitudeLayer::of(mean_alt),
        cohesion,
    }
}

/// Classifies a formation's type tag from its members' platform types.
/// First match wins, in the order given in the design.
pub fn classify_formation_type(members: &[FormationMember]) -> String {
    let types: Vec<PlatformType> = members.iter().map(|m| m.attributes.platform_type).collect();
    let count = |t: PlatformType| types.iter().filter(|&&x| x == t).count();
    let has = |t: PlatformType| count(t) > 0;

    if has(PlatformType::Awacs) && types.len() >= 2 {
        return "AEW-Controlled Group".to_string();
    }
    if has(PlatformType::Tanker) {
        return "Refueling Cell".to_string();
    }
    if has(PlatformType::Ew) {
        return "Strike Package with EW".to_string();
    }
    if types
        .iter()
        .all(|t| matches!(t, PlatformType::Fighter | PlatformType::Uav))
    {
        return "Fighter Section".to_string();
    }
    if has(PlatformType::Bomber) {
        return if has(PlatformType::Fighter) {
            "Escorted Strike Package".to_string()
        } else {
            "Bomber Cell".to_string()
        };
    }
    if has(PlatformType::Transport) {
        return "Transport Formation".to_string();
    }
    "Mixed Formation".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPosition;

    fn member(platform_type: PlatformType, lon: f64, lat: f64) -> FormationMember {
        let state = TargetState {
            timestamp: Utc::now(),
            position: GeoPosition::new(lon, lat, 5000.0),
            heading: 90.0,
            speed: 250.0,
            pitch: None,
            roll: None,
        };
        let mut attrs = TargetAttributes::default();
        attrs.platform_type = platform_type;
        FormationMember {
            target_id: Uuid::new_v4(),
            attributes: attrs,
            joined_at: Utc::now(),
            track_slice: vec![state],
        }
    }

    #[test]
    fn classify_all_fighters_is_fighter_section() {
        let members = vec![member(PlatformType::Fighter, 0.0, 0.0), member(PlatformType::Fighter, 0.01, 0.0)];
        assert_eq!(classify_formation_type(&members), "Fighter Section");
    }

    #[test]
    fn classify_bomber_with_fighter_escort_is_escorted_strike_package() {
        let members = vec![member(PlatformType::Bomber, 0.0, 0.0), member(PlatformType::Fighter, 0.01, 0.0)];
        assert_eq!(classify_formation_type(&members), "Escorted Strike Package");
    }

    #[test]
    fn classify_bomber_alone_is_bomber_cell() {
        let members = vec![member(PlatformType::Bomber, 0.0, 0.0), member(PlatformType::Bomber, 0.01, 0.0)];
        assert_eq!(classify_formation_type(&members), "Bomber Cell");
    }

    #[test]
    fn classify_awacs_takes_priority_over_fighter_section() {
        let members = vec![member(PlatformType::Awacs, 0.0, 0.0), member(PlatformType::Fighter, 0.01, 0.0)];
        assert_eq!(classify_formation_type(&members), "AEW-Controlled Group");
    }

    #[test]
    fn spatial_summary_centre_is_bounding_box_midpoint() {
        let members = vec![member(PlatformType::Fighter, 0.0, 0.0), member(PlatformType::Fighter, 1.0, 1.0)];
        let summary = spatial_summary(&members);
        assert!((summary.centre_lon - 0.5).abs() < 1e-9);
        assert!((summary.centre_lat - 0.5).abs() < 1e-9);
    }

    #[test]
    fn motion_summary_of_identical_headings_has_high_cohesion() {
        let members = vec![member(PlatformType::Fighter, 0.0, 0.0), member(PlatformType::Fighter, 0.01, 0.0)];
        let summary = motion_summary(&members);
        assert!(summary.cohesion > 0.9);
    }
}
