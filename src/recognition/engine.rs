//! Stateful wrapper around the recognition algorithm: owns the engine's
//! transient track map, the active rule set, and the incremental-mode
//! pending set / throttle.

use super::algorithm::{self, RecognitionParams};
use crate::attributes::{TargetAttributes, TargetState};
use crate::config::Config;
use crate::formation::Formation;
use crate::rules::RuleEngine;
use crate::track::{RecentStateSource, TargetTrack};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Mutex;
use tokio::sync::RwLock;
use uuid::Uuid;

fn recognition_params(config: &Config) -> RecognitionParams {
    RecognitionParams {
        sampling_step: Duration::from_std(config.sampling_step).unwrap_or(Duration::seconds(10)),
        persistence_threshold: config.persistence_threshold,
        min_formation_duration: Duration::from_std(config.min_formation_duration).unwrap_or(Duration::seconds(30)),
        min_track_points: config.min_track_points,
    }
}

/// Owns the set of tracks the recognition engine reasons about, mutated
/// only by [`RecognitionEngine::ingest`], plus the pending-changed-ids
/// bookkeeping behind incremental mode. Never runs two recognitions
/// concurrently: `run` takes the rule engine read lock for the whole pass
/// and the pending set is drained under its own mutex, so overlapping
/// callers serialise naturally.
pub struct RecognitionEngine {
    rule_engine: RwLock<RuleEngine>,
    tracks: DashMap<Uuid, TargetTrack>,
    attributes: DashMap<Uuid, TargetAttributes>,
    pending: Mutex<HashSet<Uuid>>,
    last_run: Mutex<Option<DateTime<Utc>>>,
    params: RecognitionParams,
    segment_gap: Duration,
    min_interval: Duration,
    min_change_threshold: f64,
}

impl RecognitionEngine {
    pub fn new(config: &Config, rule_engine: RuleEngine) -> Self {
        Self {
            rule_engine: RwLock::new(rule_engine),
            tracks: DashMap::new(),
            attributes: DashMap::new(),
            pending: Mutex::new(HashSet::new()),
            last_run: Mutex::new(None),
            params: recognition_params(config),
            segment_gap: Duration::from_std(config.segment_gap).unwrap_or(Duration::seconds(120)),
            min_interval: Duration::from_std(config.min_interval).unwrap_or(Duration::seconds(5)),
            min_change_threshold: config.min_change_threshold,
        }
    }

    pub async fn apply_preset(&self, rules: Vec<std::sync::Arc<dyn crate::rules::Rule>>) {
        self.rule_engine.write().await.apply_preset(rules);
    }

    /// Appends a state to the named target's track (creating it on first
    /// sight), refreshes its attributes, and marks it pending. Returns
    /// whether the pending set already warrants an immediate trigger per
    /// the `MIN_CHANGE_THRESHOLD` / pending-size-10 rule — callers are
    /// still bound by `should_run`'s `MIN_INTERVAL` gate.
    pub fn ingest(&self, target_id: Uuid, state: TargetState, attributes: TargetAttributes) {
        self.tracks
            .entry(target_id)
            .or_insert_with(|| TargetTrack::new(target_id, self.segment_gap))
            .add_state(state, false);
        self.attributes.insert(target_id, attributes);
        self.pending.lock().unwrap().insert(target_id);
    }

    /// Ratio-or-size immediate-trigger check for a batch of `changed` ids
    /// out of `total` records in a single push.
    pub fn wants_immediate_trigger(&self, changed: usize, total: usize) -> bool {
        if total == 0 {
            return false;
        }
        let ratio = changed as f64 / total as f64;
        ratio >= self.min_change_threshold || self.pending.lock().unwrap().len() >= 10
    }

    pub fn should_run(&self, forced: bool) -> bool {
        if forced {
            return true;
        }
        let last_run = *self.last_run.lock().unwrap();
        match last_run {
            None => true,
            Some(last) => Utc::now() - last >= self.min_interval || !self.pending.lock().unwrap().is_empty(),
        }
    }

    /// Runs recognition over every track currently held by the engine
    /// (not just the pending ids — a pending id's formation may include
    /// targets that didn't themselves change). Clears the pending set and
    /// stamps `last_run` only on success; on failure the caller is
    /// expected to re-add the ids it knows changed via `restore_pending`.
    pub async fn run(&self, forced: bool, recent: Option<&dyn RecentStateSource>) -> Option<Vec<Formation>> {
        if !self.should_run(forced) {
            return None;
        }
        let taken: HashSet<Uuid> = std::mem::take(&mut *self.pending.lock().unwrap());

        let tracks: std::collections::HashMap<Uuid, TargetTrack> =
            self.tracks.iter().map(|e| (*e.key(), e.value().clone())).collect();
        let attributes: std::collections::HashMap<Uuid, TargetAttributes> =
            self.attributes.iter().map(|e| (*e.key(), e.value().clone())).collect();

        let rule_engine = self.rule_engine.read().await;
        let formations = algorithm::recognize(&tracks, &attributes, None, &rule_engine, &self.params, recent);

        *self.last_run.lock().unwrap() = Some(Utc::now());
        drop(taken);
        Some(formations)
    }

    /// Re-adds ids to the pending set; used by callers when a run's
    /// downstream side effects (e.g. persisting formations) failed and
    /// the ids should be retried on the next tick.
    pub fn restore_pending(&self, ids: impl IntoIterator<Item = Uuid>) {
        self.pending.lock().unwrap().extend(ids);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPosition;

    fn state(lon: f64) -> TargetState {
        TargetState {
            timestamp: Utc::now(),
            position: GeoPosition::new(lon, 39.9, 5000.0),
            heading: 90.0,
            speed: 250.0,
            pitch: None,
            roll: None,
        }
    }

    #[tokio::test]
    async fn never_run_is_always_eligible() {
        let engine = RecognitionEngine::new(&Config::default(), RuleEngine::new());
        assert!(engine.should_run(false));
    }

    #[tokio::test]
    async fn run_clears_pending_and_stamps_last_run() {
        let engine = RecognitionEngine::new(&Config::default(), RuleEngine::new());
        engine.ingest(Uuid::new_v4(), state(116.4), TargetAttributes::default());
        assert_eq!(engine.pending_len(), 1);
        engine.run(false, None).await;
        assert_eq!(engine.pending_len(), 0);
        assert!(!engine.should_run(false));
    }

    #[tokio::test]
    async fn immediate_trigger_fires_above_change_threshold() {
        let engine = RecognitionEngine::new(&Config::default(), RuleEngine::new());
        assert!(engine.wants_immediate_trigger(5, 10));
        assert!(!engine.wants_immediate_trigger(0, 100));
    }

    #[tokio::test]
    async fn restore_pending_re_adds_ids() {
        let engine = RecognitionEngine::new(&Config::default(), RuleEngine::new());
        let id = Uuid::new_v4();
        engine.restore_pending([id]);
        assert_eq!(engine.pending_len(), 1);
    }
}
