//! A rule is a named, priority-tagged, enable-able, weighted predicate over
//! a pair of target tracks at a common time. The engine evaluates a
//! configured rule set over a [`RuleContext`] and aggregates the result.

pub mod kinds;
pub mod presets;

use crate::attributes::{MotionFeatures, TargetAttributes, TargetState};
use crate::track::TargetTrack;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Smaller numbers are stronger; CRITICAL rules gate the whole evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum Priority {
    Critical = 0,
    High = 1,
    Medium = 2,
    Low = 3,
    Optional = 4,
}

impl Priority {
    const MAX_VALUE: u8 = Priority::Optional as u8;

    pub fn value(self) -> u8 {
        self as u8
    }

    /// Resolves the priority-weighting bug flagged in the design notes:
    /// `weight = (MAX_PRIORITY + 1 - priorityValue)`, so CRITICAL (0)
    /// carries the most influence instead of the least.
    pub fn weight(self) -> f64 {
        (Self::MAX_VALUE + 1 - self.value()) as f64
    }
}

pub struct RuleContext<'a> {
    pub track1: &'a TargetTrack,
    pub track2: &'a TargetTrack,
    pub state1: &'a TargetState,
    pub state2: &'a TargetState,
    pub attributes1: &'a TargetAttributes,
    pub attributes2: &'a TargetAttributes,
    pub features1: Option<MotionFeatures>,
    pub features2: Option<MotionFeatures>,
    pub current_time: DateTime<Utc>,
    pub params: &'a HashMap<String, Value>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RuleResult {
    pub passed: bool,
    pub confidence: f64,
    pub priority: Priority,
    pub message: String,
    pub details: Value,
}

impl RuleResult {
    pub fn pass(priority: Priority, confidence: f64, message: impl Into<String>) -> Self {
        Self {
            passed: true,
            confidence: confidence.clamp(0.0, 1.2),
            priority,
            message: message.into(),
            details: Value::Null,
        }
    }

    pub fn fail(priority: Priority, message: impl Into<String>) -> Self {
        Self {
            passed: false,
            confidence: 0.0,
            priority,
            message: message.into(),
            details: Value::Null,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

#[derive(Debug, Default)]
pub struct RuleStats {
    pub evaluations: AtomicU64,
    pub passed: AtomicU64,
    pub failed: AtomicU64,
}

impl RuleStats {
    pub fn record(&self, passed: bool) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        if passed {
            self.passed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.evaluations.load(Ordering::Relaxed),
            self.passed.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
        )
    }
}

pub trait Rule: Send + Sync {
    fn name(&self) -> &str;
    fn priority(&self) -> Priority;
    fn is_enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool);
    fn weight(&self) -> f64;
    fn stats(&self) -> &RuleStats;
    fn evaluate(&self, ctx: &RuleContext) -> RuleResult;

    /// Evaluates and records pass/fail into this rule's stats. Rules are
    /// evaluated through this method, never `evaluate` directly, so
    /// statistics stay idempotent per evaluation.
    fn run(&self, ctx: &RuleContext) -> RuleResult {
        let result = self.evaluate(ctx);
        self.stats().record(result.passed);
        result
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RuleOutcome {
    pub rule_name: String,
    pub priority: Priority,
    pub passed: bool,
    pub confidence: f64,
    pub message: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct EvaluationResult {
    pub passed: bool,
    pub confidence: f64,
    pub outcomes: Vec<RuleOutcome>,
    pub critical_failed: bool,
}

/// A named, mutable rule set, evaluated in priority order.
#[derive(Clone)]
pub struct RuleEngine {
    rules: Vec<Arc<dyn Rule>>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rules(rules: Vec<Arc<dyn Rule>>) -> Self {
        Self { rules }
    }

    pub fn add_rule(&mut self, rule: Arc<dyn Rule>) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[Arc<dyn Rule>] {
        &self.rules
    }

    /// Replaces the current rule set atomically (from the caller's point
    /// of view: the old `Vec` is dropped only after the new one is fully
    /// built).
    pub fn apply_preset(&mut self, rules: Vec<Arc<dyn Rule>>) {
        self.rules = rules;
    }

    pub fn evaluate(&self, ctx: &RuleContext) -> EvaluationResult {
        let mut sorted: Vec<&Arc<dyn Rule>> = self.rules.iter().collect();
        sorted.sort_by_key(|r| r.priority().value());

        let mut outcomes = Vec::new();
        let mut critical_failed = false;
        let mut total_weighted_confidence = 0.0;
        let mut total_weight = 0.0;

        for rule in sorted {
            if !rule.is_enabled() {
                continue;
            }
            let result = rule.run(ctx);
            outcomes.push(RuleOutcome {
                rule_name: rule.name().to_string(),
                priority: result.priority,
                passed: result.passed,
                confidence: result.confidence,
                message: result.message.clone(),
            });

            if result.priority == Priority::Critical && !result.passed {
                critical_failed = true;
                break;
            }

            if result.passed {
                let w = rule.weight() * result.priority.weight();
                total_weighted_confidence += result.confidence * w;
                total_weight += w;
            }
        }

        let confidence = if critical_failed {
            0.0
        } else if total_weight > 0.0 {
            total_weighted_confidence / total_weight
        } else {
            0.0
        };

        let passed = !critical_failed && outcomes.iter().all(|o| o.passed);

        EvaluationResult {
            passed,
            confidence,
            outcomes,
            critical_failed,
        }
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::kinds::{AttributeParams, AttributeRule, DistanceParams, DistanceRule};

    fn base_attrs() -> TargetAttributes {
        TargetAttributes::default()
    }

    fn state_at(lon: f64) -> TargetState {
        TargetState {
            timestamp: Utc::now(),
            position: crate::geo::GeoPosition::new(lon, 39.9, 5000.0),
            heading: 90.0,
            speed: 250.0,
            pitch: None,
            roll: None,
        }
    }

    fn track() -> TargetTrack {
        TargetTrack::new(uuid::Uuid::new_v4(), chrono::Duration::seconds(120))
    }

    #[test]
    fn critical_failure_zeroes_aggregate_confidence() {
        let mut engine = RuleEngine::new();
        engine.add_rule(Arc::new(AttributeRule::new(
            "Hostile",
            Priority::Critical,
            AttributeParams {
                hostile_check: true,
                same_alliance: false,
                same_theatre: false,
                hostile_pairs: vec![("RED".to_string(), "BLUE".to_string())],
            },
        )));

        let t1 = track();
        let t2 = track();
        let s1 = state_at(0.0);
        let s2 = state_at(0.01);
        let mut attrs1 = base_attrs();
        attrs1.nation = Some("RED".to_string());
        let mut attrs2 = base_attrs();
        attrs2.nation = Some("BLUE".to_string());
        let params = HashMap::new();

        let ctx = RuleContext {
            track1: &t1,
            track2: &t2,
            state1: &s1,
            state2: &s2,
            attributes1: &attrs1,
            attributes2: &attrs2,
            features1: None,
            features2: None,
            current_time: Utc::now(),
            params: &params,
        };

        let result = engine.evaluate(&ctx);
        assert!(!result.passed);
        assert_eq!(result.confidence, 0.0);
        assert!(result.critical_failed);
    }

    #[test]
    fn disabled_rule_is_skipped() {
        let rule = Arc::new(DistanceRule::new(
            "Dist",
            Priority::High,
            DistanceParams { min: 0.0, max: 100.0 },
        ));
        rule.set_enabled(false);
        let mut engine = RuleEngine::new();
        engine.add_rule(rule.clone());

        let t1 = track();
        let t2 = track();
        let s1 = state_at(0.0);
        let s2 = state_at(10.0);
        let attrs1 = base_attrs();
        let attrs2 = base_attrs();
        let params = HashMap::new();
        let ctx = RuleContext {
            track1: &t1,
            track2: &t2,
            state1: &s1,
            state2: &s2,
            attributes1: &attrs1,
            attributes2: &attrs2,
            features1: None,
            features2: None,
            current_time: Utc::now(),
            params: &params,
        };

        let result = engine.evaluate(&ctx);
        assert!(result.outcomes.is_empty());
        assert!(result.passed);
        let (evaluations, ..) = rule.stats().snapshot();
        assert_eq!(evaluations, 0);
    }

    #[test]
    fn priority_weight_favours_critical() {
        assert!(Priority::Critical.weight() > Priority::Optional.weight());
        assert_eq!(Priority::Critical.weight(), 5.0);
        assert_eq!(Priority::Optional.weight(), 1.0);
    }
}
