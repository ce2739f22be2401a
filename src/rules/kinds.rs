//! Concrete rule kinds, each exposing its parameters through a typed
//! record. `Distance`, `Altitude`, `Speed`, `Heading`, `Attribute`,
//! `PlatformType` are fixed-shape; `Custom` wraps a user predicate.

use super::{Priority, Rule, RuleContext, RuleResult, RuleStats};
use crate::attributes::PlatformType;
use crate::geo::{AltitudeLayer, heading_delta};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};

struct RuleBase {
    name: String,
    priority: Priority,
    enabled: AtomicBool,
    weight: f64,
    stats: RuleStats,
}

impl RuleBase {
    fn new(name: impl Into<String>, priority: Priority) -> Self {
        Self {
            name: name.into(),
            priority,
            enabled: AtomicBool::new(true),
            weight: 1.0,
            stats: RuleStats::default(),
        }
    }
}

/// Implements the bookkeeping half of `Rule` (name/priority/enabled/weight/
/// stats) for a struct with a `base: RuleBase` field, leaving `evaluate` to
/// be hand-written per kind.
macro_rules! impl_rule_bookkeeping {
    ($ty:ty) => {
        impl $ty {
            pub fn set_weight(&mut self, weight: f64) -> &mut Self {
                self.base.weight = weight;
                self
            }
        }

        impl Rule for $ty {
            fn name(&self) -> &str {
                &self.base.name
            }
            fn priority(&self) -> Priority {
                self.base.priority
            }
            fn is_enabled(&self) -> bool {
                self.base.enabled.load(Ordering::Relaxed)
            }
            fn set_enabled(&self, enabled: bool) {
                self.base.enabled.store(enabled, Ordering::Relaxed);
            }
            fn weight(&self) -> f64 {
                self.base.weight
            }
            fn stats(&self) -> &RuleStats {
                &self.base.stats
            }
            fn evaluate(&self, ctx: &RuleContext) -> RuleResult {
                self.evaluate_impl(ctx)
            }
        }
    };
}

#[derive(Debug, Clone, Copy)]
pub struct DistanceParams {
    pub min: f64,
    pub max: f64,
}

pub struct DistanceRule {
    base: RuleBase,
    pub params: DistanceParams,
}

impl DistanceRule {
    pub fn new(name: impl Into<String>, priority: Priority, params: DistanceParams) -> Self {
        Self {
            base: RuleBase::new(name, priority),
            params,
        }
    }

    fn evaluate_impl(&self, ctx: &RuleContext) -> RuleResult {
        let horizontal = ctx.state1.position.horizontal_distance(&ctx.state2.position);
        let DistanceParams { min, max } = self.params;
        if horizontal < min || horizontal > max {
            return RuleResult::fail(
                self.priority(),
                format!("distance {horizontal:.0}m outside [{min:.0}, {max:.0}]"),
            );
        }
        let mid = (min + max) / 2.0;
        let span = (max - min).max(1e-9);
        let confidence = (1.0 - (horizontal - mid).abs() / span).clamp(0.5, 1.0);
        RuleResult::pass(self.priority(), confidence, format!("distance {horizontal:.0}m"))
            .with_details(json!({ "horizontal_m": horizontal }))
    }
}
impl_rule_bookkeeping!(DistanceRule);

#[derive(Debug, Clone, Copy)]
pub struct AltitudeParams {
    pub max_delta: f64,
    pub same_layer_preferred: bool,
}

pub struct AltitudeRule {
    base: RuleBase,
    pub params: AltitudeParams,
}

impl AltitudeRule {
    pub fn new(name: impl Into<String>, priority: Priority, params: AltitudeParams) -> Self {
        Self {
            base: RuleBase::new(name, priority),
            params,
        }
    }

    fn evaluate_impl(&self, ctx: &RuleContext) -> RuleResult {
        let vertical = ctx.state1.position.vertical_distance(&ctx.state2.position);
        if vertical > self.params.max_delta {
            return RuleResult::fail(
                self.priority(),
                format!("altitude diff {vertical:.0}m exceeds {:.0}m", self.params.max_delta),
            );
        }
        let mut confidence = 1.0 - vertical / self.params.max_delta.max(1e-9);
        if self.params.same_layer_preferred {
            let l1 = AltitudeLayer::of(ctx.state1.position.alt);
            let l2 = AltitudeLayer::of(ctx.state2.position.alt);
            if l1 == l2 {
                confidence = (confidence + 0.1).min(1.0);
            }
        }
        RuleResult::pass(self.priority(), confidence, format!("altitude diff {vertical:.0}m"))
    }
}
impl_rule_bookkeeping!(AltitudeRule);

#[derive(Debug, Clone, Copy)]
pub struct SpeedParams {
    pub max_delta: f64,
    pub max_ratio: f64,
}

pub struct SpeedRule {
    base: RuleBase,
    pub params: SpeedParams,
}

impl SpeedRule {
    pub fn new(name: impl Into<String>, priority: Priority, params: SpeedParams) -> Self {
        Self {
            base: RuleBase::new(name, priority),
            params,
        }
    }

    fn evaluate_impl(&self, ctx: &RuleContext) -> RuleResult {
        let abs_delta = (ctx.state1.speed - ctx.state2.speed).abs();
        let min_speed = ctx.state1.speed.min(ctx.state2.speed).max(1.0);
        let max_speed = ctx.state1.speed.max(ctx.state2.speed).max(1.0);
        let ratio = max_speed / min_speed;

        if abs_delta > self.params.max_delta || ratio > self.params.max_ratio {
            return RuleResult::fail(
                self.priority(),
                format!("speed diff {abs_delta:.1}m/s ratio {ratio:.2} out of bounds"),
            );
        }
        let confidence = 1.0 - abs_delta / self.params.max_delta.max(1e-9);
        RuleResult::pass(self.priority(), confidence, format!("speed diff {abs_delta:.1}m/s"))
    }
}
impl_rule_bookkeeping!(SpeedRule);

#[derive(Debug, Clone, Copy)]
pub struct HeadingParams {
    pub max_delta: f64,
    pub allow_reciprocal: bool,
}

pub struct HeadingRule {
    base: RuleBase,
    pub params: HeadingParams,
}

impl HeadingRule {
    pub fn new(name: impl Into<String>, priority: Priority, params: HeadingParams) -> Self {
        Self {
            base: RuleBase::new(name, priority),
            params,
        }
    }

    fn evaluate_impl(&self, ctx: &RuleContext) -> RuleResult {
        let delta = heading_delta(ctx.state1.heading, ctx.state2.heading).abs();
        if delta <= self.params.max_delta {
            let confidence = 1.0 - delta / self.params.max_delta.max(1e-9);
            return RuleResult::pass(self.priority(), confidence, format!("heading diff {delta:.1}deg"));
        }
        if self.params.allow_reciprocal {
            let reciprocal_delta = (delta - 180.0).abs();
            if reciprocal_delta <= self.params.max_delta {
                let confidence = 0.7 * (1.0 - reciprocal_delta / self.params.max_delta.max(1e-9));
                return RuleResult::pass(
                    self.priority(),
                    confidence,
                    format!("reciprocal heading diff {reciprocal_delta:.1}deg"),
                );
            }
        }
        RuleResult::fail(self.priority(), format!("heading diff {delta:.1}deg exceeds bound"))
    }
}
impl_rule_bookkeeping!(HeadingRule);

#[derive(Debug, Clone)]
pub struct AttributeParams {
    pub hostile_check: bool,
    pub same_alliance: bool,
    pub same_theatre: bool,
    /// Configurable hostile-pair table; defaults to a single RED/BLUE
    /// pair (see Open Question 1 in DESIGN.md).
    pub hostile_pairs: Vec<(String, String)>,
}

impl Default for AttributeParams {
    fn default() -> Self {
        Self {
            hostile_check: true,
            same_alliance: true,
            same_theatre: false,
            hostile_pairs: vec![("RED".to_string(), "BLUE".to_string())],
        }
    }
}

pub struct AttributeRule {
    base: RuleBase,
    pub params: AttributeParams,
}

impl AttributeRule {
    pub fn new(name: impl Into<String>, priority: Priority, params: AttributeParams) -> Self {
        Self {
            base: RuleBase::new(name, priority),
            params,
        }
    }

    fn is_hostile_pair(&self, a: &str, b: &str) -> bool {
        self.params
            .hostile_pairs
            .iter()
            .any(|(x, y)| (x == a && y == b) || (x == b && y == a))
    }

    fn evaluate_impl(&self, ctx: &RuleContext) -> RuleResult {
        if self.params.hostile_check
            && let (Some(n1), Some(n2)) = (&ctx.attributes1.nation, &ctx.attributes2.nation)
            && self.is_hostile_pair(n1, n2)
        {
            return RuleResult::fail(self.priority(), format!("hostile pair {n1}/{n2}"));
        }
        if self.params.same_alliance
            && let (Some(a1), Some(a2)) = (&ctx.attributes1.alliance, &ctx.attributes2.alliance)
            && a1 != a2
        {
            return RuleResult::fail(self.priority(), "alliance mismatch");
        }
        if self.params.same_theatre
            && let (Some(t1), Some(t2)) = (&ctx.attributes1.theatre, &ctx.attributes2.theatre)
            && t1 != t2
        {
            return RuleResult::fail(self.priority(), "theatre mismatch");
        }
        RuleResult::pass(self.priority(), 1.0, "attributes compatible")
    }
}
impl_rule_bookkeeping!(AttributeRule);

#[derive(Debug, Clone, Default)]
pub struct PlatformTypeParams {
    pub allowed_pairs: Vec<(PlatformType, PlatformType)>,
    pub forbidden_pairs: Vec<(PlatformType, PlatformType)>,
}

pub struct PlatformTypeRule {
    base: RuleBase,
    pub params: PlatformTypeParams,
}

impl PlatformTypeRule {
    pub fn new(name: impl Into<String>, priority: Priority, params: PlatformTypeParams) -> Self {
        Self {
            base: RuleBase::new(name, priority),
            params,
        }
    }

    fn contains_pair(pairs: &[(PlatformType, PlatformType)], a: PlatformType, b: PlatformType) -> bool {
        pairs.iter().any(|&(x, y)| (x == a && y == b) || (x == b && y == a))
    }

    fn evaluate_impl(&self, ctx: &RuleContext) -> RuleResult {
        let p1 = ctx.attributes1.platform_type;
        let p2 = ctx.attributes2.platform_type;

        if p1 == PlatformType::Unknown || p2 == PlatformType::Unknown {
            return RuleResult::pass(self.priority(), 0.8, "unknown platform type");
        }
        if Self::contains_pair(&self.params.forbidden_pairs, p1, p2) {
            return RuleResult::fail(self.priority(), format!("forbidden platform pair {p1:?}/{p2:?}"));
        }
        if Self::contains_pair(&self.params.allowed_pairs, p1, p2) {
            // Exceeding 1.0 is an intentional upweight for preferred pairs.
            return RuleResult::pass(self.priority(), 1.2, format!("preferred platform pair {p1:?}/{p2:?}"));
        }
        RuleResult::pass(self.priority(), 0.9, format!("platform pair {p1:?}/{p2:?}"))
    }
}
impl_rule_bookkeeping!(PlatformTypeRule);

pub struct CustomRule {
    base: RuleBase,
    predicate: Box<dyn Fn(&RuleContext) -> RuleResult + Send + Sync>,
}

impl CustomRule {
    pub fn new(
        name: impl Into<String>,
        priority: Priority,
        predicate: impl Fn(&RuleContext) -> RuleResult + Send + Sync + 'static,
    ) -> Self {
        Self {
            base: RuleBase::new(name, priority),
            predicate: Box::new(predicate),
        }
    }

    fn evaluate_impl(&self, ctx: &RuleContext) -> RuleResult {
        (self.predicate)(ctx)
    }
}
impl_rule_bookkeeping!(CustomRule);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{TargetAttributes, TargetState};
    use crate::geo::GeoPosition;
    use crate::track::TargetTrack;
    use chrono::Utc;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn ctx_fixture<'a>(
        track1: &'a TargetTrack,
        track2: &'a TargetTrack,
        state1: &'a TargetState,
        state2: &'a TargetState,
        attrs1: &'a TargetAttributes,
        attrs2: &'a TargetAttributes,
        params: &'a HashMap<String, serde_json::Value>,
    ) -> RuleContext<'a> {
        RuleContext {
            track1,
            track2,
            state1,
            state2,
            attributes1: attrs1,
            attributes2: attrs2,
            features1: None,
            features2: None,
            current_time: Utc::now(),
            params,
        }
    }

    fn state(lon: f64, heading: f64, speed: f64, alt: f64) -> TargetState {
        TargetState {
            timestamp: Utc::now(),
            position: GeoPosition::new(lon, 39.9, alt),
            heading,
            speed,
            pitch: None,
            roll: None,
        }
    }

    #[test]
    fn distance_rule_accepts_boundary_min_equals_max() {
        let rule = DistanceRule::new(
            "d",
            Priority::Critical,
            DistanceParams { min: 1000.0, max: 1000.0 },
        );
        let t1 = TargetTrack::new(Uuid::new_v4(), chrono::Duration::seconds(1));
        let t2 = TargetTrack::new(Uuid::new_v4(), chrono::Duration::seconds(1));
        // 1000m horizontal at this latitude: back out an approximate lon delta.
        let lat_rad = 39.9_f64.to_radians();
        let d_lon = 1000.0 / (111_320.0 * lat_rad.cos());
        let s1 = state(0.0, 0.0, 100.0, 5000.0);
        let s2 = state(d_lon, 0.0, 100.0, 5000.0);
        let attrs = TargetAttributes::default();
        let params = HashMap::new();
        let ctx = ctx_fixture(&t1, &t2, &s1, &s2, &attrs, &attrs, &params);
        let result = rule.evaluate(&ctx);
        assert!(result.passed, "boundary min=max should pass: {:?}", result);
    }

    #[test]
    fn speed_rule_floors_min_speed_to_avoid_divide_by_zero() {
        let rule = SpeedRule::new(
            "s",
            Priority::High,
            SpeedParams { max_delta: 300.0, max_ratio: 100.0 },
        );
        let t1 = TargetTrack::new(Uuid::new_v4(), chrono::Duration::seconds(1));
        let t2 = TargetTrack::new(Uuid::new_v4(), chrono::Duration::seconds(1));
        let s1 = state(0.0, 0.0, 0.0, 5000.0);
        let s2 = state(0.0, 0.0, 50.0, 5000.0);
        let attrs = TargetAttributes::default();
        let params = HashMap::new();
        let ctx = ctx_fixture(&t1, &t2, &s1, &s2, &attrs, &attrs, &params);
        let result = rule.evaluate(&ctx);
        assert!(result.passed);
    }

    #[test]
    fn heading_rule_reciprocal_confidence_is_lower_than_same_direction() {
        let t1 = TargetTrack::new(Uuid::new_v4(), chrono::Duration::seconds(1));
        let t2 = TargetTrack::new(Uuid::new_v4(), chrono::Duration::seconds(1));
        let attrs = TargetAttributes::default();
        let params = HashMap::new();

        let same_dir_rule = HeadingRule::new(
            "h1",
            Priority::High,
            HeadingParams { max_delta: 15.0, allow_reciprocal: false },
        );
        let s1 = state(0.0, 90.0, 250.0, 5000.0);
        let s2 = state(0.0, 95.0, 250.0, 5000.0);
        let ctx = ctx_fixture(&t1, &t2, &s1, &s2, &attrs, &attrs, &params);
        let same_dir = same_dir_rule.evaluate(&ctx);

        let recip_rule = HeadingRule::new(
            "h2",
            Priority::High,
            HeadingParams { max_delta: 15.0, allow_reciprocal: true },
        );
        let s3 = state(0.0, 90.0, 250.0, 5000.0);
        let s4 = state(0.0, 270.0, 250.0, 5000.0);
        let ctx2 = ctx_fixture(&t1, &t2, &s3, &s4, &attrs, &attrs, &params);
        let recip = recip_rule.evaluate(&ctx2);

        assert!(same_dir.passed);
        assert!(recip.passed);
        assert!(recip.confidence < same_dir.confidence);
    }

    #[test]
    fn attribute_rule_rejects_configured_hostile_pair() {
        let rule = AttributeRule::new("a", Priority::Critical, AttributeParams::default());
        let t1 = TargetTrack::new(Uuid::new_v4(), chrono::Duration::seconds(1));
        let t2 = TargetTrack::new(Uuid::new_v4(), chrono::Duration::seconds(1));
        let s = state(0.0, 90.0, 250.0, 5000.0);
        let mut a1 = TargetAttributes::default();
        a1.nation = Some("RED".to_string());
        let mut a2 = TargetAttributes::default();
        a2.nation = Some("BLUE".to_string());
        let params = HashMap::new();
        let ctx = ctx_fixture(&t1, &t2, &s, &s, &a1, &a2, &params);
        assert!(!rule.evaluate(&ctx).passed);
    }

    #[test]
    fn platform_type_rule_upweights_preferred_pair() {
        let rule = PlatformTypeRule::new(
            "p",
            Priority::Medium,
            PlatformTypeParams {
                allowed_pairs: vec![(PlatformType::Fighter, PlatformType::Bomber)],
                forbidden_pairs: vec![],
            },
        );
        let t1 = TargetTrack::new(Uuid::new_v4(), chrono::Duration::seconds(1));
        let t2 = TargetTrack::new(Uuid::new_v4(), chrono::Duration::seconds(1));
        let s = state(0.0, 90.0, 250.0, 5000.0);
        let mut a1 = TargetAttributes::default();
        a1.platform_type = PlatformType::Fighter;
        let mut a2 = TargetAttributes::default();
        a2.platform_type = PlatformType::Bomber;
        let params = HashMap::new();
        let ctx = ctx_fixture(&t1, &t2, &s, &s, &a1, &a2, &params);
        let result = rule.evaluate(&ctx);
        assert!(result.passed);
        assert_eq!(result.confidence, 1.2);
    }
}
