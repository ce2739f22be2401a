//! Named rule bundles matching the original system's four formation
//! presets (`rule_manager.py::create_preset`), ported kind-for-kind
//! with identical parameters and priorities.

use super::kinds::{
    AltitudeParams, AltitudeRule, AttributeParams, AttributeRule, DistanceParams, DistanceRule,
    HeadingParams, HeadingRule, PlatformTypeParams, PlatformTypeRule, SpeedParams, SpeedRule,
};
use super::{Priority, Rule};
use crate::attributes::PlatformType;
use std::sync::Arc;

fn hostile_check(priority: Priority) -> Arc<dyn Rule> {
    Arc::new(AttributeRule::new(
        "HostileCheck",
        priority,
        AttributeParams {
            hostile_check: true,
            same_alliance: false,
            same_theatre: false,
            hostile_pairs: vec![("RED".to_string(), "BLUE".to_string())],
        },
    ))
}

fn alliance_check(priority: Priority) -> Arc<dyn Rule> {
    Arc::new(AttributeRule::new(
        "AllianceCheck",
        priority,
        AttributeParams {
            hostile_check: false,
            same_alliance: true,
            same_theatre: false,
            hostile_pairs: Vec::new(),
        },
    ))
}

fn coalition_check(priority: Priority) -> Arc<dyn Rule> {
    Arc::new(AttributeRule::new(
        "CoalitionCheck",
        priority,
        AttributeParams {
            hostile_check: true,
            same_alliance: true,
            same_theatre: false,
            hostile_pairs: vec![("RED".to_string(), "BLUE".to_string())],
        },
    ))
}

/// Tight formation of like fighters: close, level, matched speed and
/// heading.
pub fn tight_fighter() -> Vec<Arc<dyn Rule>> {
    vec![
        hostile_check(Priority::Critical),
        Arc::new(DistanceRule::new(
            "Distance",
            Priority::Critical,
            DistanceParams { min: 0.0, max: 3000.0 },
        )),
        Arc::new(AltitudeRule::new(
            "Altitude",
            Priority::High,
            AltitudeParams { max_delta: 300.0, same_layer_preferred: true },
        )),
        Arc::new(SpeedRule::new(
            "Speed",
            Priority::High,
            SpeedParams { max_delta: 20.0, max_ratio: 1.1 },
        )),
        Arc::new(HeadingRule::new(
            "Heading",
            Priority::High,
            HeadingParams { max_delta: 15.0, allow_reciprocal: false },
        )),
    ]
}

/// Loose bomber formation: wider spacing, same alliance rather than
/// strict hostile check.
pub fn loose_bomber() -> Vec<Arc<dyn Rule>> {
    vec![
        alliance_check(Priority::Critical),
        Arc::new(DistanceRule::new(
            "Distance",
            Priority::Critical,
            DistanceParams { min: 3000.0, max: 10000.0 },
        )),
        Arc::new(AltitudeRule::new(
            "Altitude",
            Priority::High,
            AltitudeParams { max_delta: 1000.0, same_layer_preferred: true },
        )),
        Arc::new(SpeedRule::new(
            "Speed",
            Priority::High,
            SpeedParams { max_delta: 30.0, max_ratio: 1.2 },
        )),
        Arc::new(HeadingRule::new(
            "Heading",
            Priority::High,
            HeadingParams { max_delta: 20.0, allow_reciprocal: false },
        )),
    ]
}

/// Mixed-role strike package: fighters escorting bombers/EW/AWACS, wide
/// spacing, reciprocal headings allowed (escort orbiting the package).
pub fn strike_package() -> Vec<Arc<dyn Rule>> {
    vec![
        coalition_check(Priority::Critical),
        Arc::new(DistanceRule::new(
            "Distance",
            Priority::Critical,
            DistanceParams { min: 5000.0, max: 20000.0 },
        )),
        Arc::new(AltitudeRule::new(
            "Altitude",
            Priority::Medium,
            AltitudeParams { max_delta: 2000.0, same_layer_preferred: false },
        )),
        Arc::new(SpeedRule::new(
            "Speed",
            Priority::Medium,
            SpeedParams { max_delta: 100.0, max_ratio: 2.0 },
        )),
        Arc::new(HeadingRule::new(
            "Heading",
            Priority::Medium,
            HeadingParams { max_delta: 60.0, allow_reciprocal: true },
        )),
        Arc::new(PlatformTypeRule::new(
            "MixedTypes",
            Priority::Medium,
            PlatformTypeParams {
                allowed_pairs: vec![
                    (PlatformType::Fighter, PlatformType::Bomber),
                    (PlatformType::Fighter, PlatformType::Ew),
                    (PlatformType::Awacs, PlatformType::Fighter),
                ],
                forbidden_pairs: Vec::new(),
            },
        )),
    ]
}

/// AWACS control picture: long-range association between an AWACS and
/// the fighters it is controlling.
pub fn awacs_control() -> Vec<Arc<dyn Rule>> {
    vec![
        alliance_check(Priority::Critical),
        Arc::new(DistanceRule::new(
            "Distance",
            Priority::Critical,
            DistanceParams { min: 50000.0, max: 150000.0 },
        )),
        Arc::new(AltitudeRule::new(
            "Altitude",
            Priority::High,
            AltitudeParams { max_delta: 3000.0, same_layer_preferred: false },
        )),
    ]
}

/// Resolves a preset by name, matching the original system's string-keyed
/// `create_preset` lookup.
pub fn by_name(name: &str) -> Option<Vec<Arc<dyn Rule>>> {
    match name {
        "tight_fighter" => Some(tight_fighter()),
        "loose_bomber" => Some(loose_bomber()),
        "strike_package" => Some(strike_package()),
        "awacs_control" => Some(awacs_control()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_presets_resolve_by_name() {
        for name in ["tight_fighter", "loose_bomber", "strike_package", "awacs_control"] {
            assert!(by_name(name).is_some(), "preset {name} should resolve");
        }
        assert!(by_name("nonexistent").is_none());
    }

    #[test]
    fn tight_fighter_has_five_rules_led_by_critical_checks() {
        let rules = tight_fighter();
        assert_eq!(rules.len(), 5);
        assert_eq!(rules[0].priority(), Priority::Critical);
        assert_eq!(rules[1].priority(), Priority::Critical);
    }

    #[test]
    fn strike_package_includes_platform_type_rule() {
        let rules = strike_package();
        assert!(rules.iter().any(|r| r.name() == "MixedTypes"));
    }
}
