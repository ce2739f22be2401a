//! Integration tests exercising the stream-service -> cache -> recognition
//! -> store -> bus pipeline end-to-end against the in-memory backends, plus
//! a couple of cross-module checks that don't need the full stream wiring.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use formation_recognition::attributes::{PlatformType, TargetAttributes, TargetState};
use formation_recognition::bus::SubscriptionBus;
use formation_recognition::cache::TargetCache;
use formation_recognition::cache::memory::MemoryBackend;
use formation_recognition::config::Config;
use formation_recognition::geo::GeoPosition;
use formation_recognition::recognition::RecognitionEngine;
use formation_recognition::rules::kinds::{HeadingParams, HeadingRule};
use formation_recognition::rules::presets;
use formation_recognition::rules::{Priority, Rule, RuleContext, RuleEngine};
use formation_recognition::store::FormationStore;
use formation_recognition::store::memory::MemoryFormationBackend;
use formation_recognition::stream::{InboundTarget, StreamService};
use formation_recognition::sync::DeltaSyncService;
use formation_recognition::track::TargetTrack;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

fn state(ts: DateTime<Utc>, lon: f64, lat: f64, alt: f64, heading: f64, speed: f64) -> TargetState {
    TargetState { timestamp: ts, position: GeoPosition::new(lon, lat, alt), heading, speed, pitch: None, roll: None }
}

fn fighter(nation: &str) -> TargetAttributes {
    TargetAttributes {
        platform_type: PlatformType::Fighter,
        nation: Some(nation.to_string()),
        alliance: Some("NATO".to_string()),
        ..Default::default()
    }
}

/// Every handle a test needs into a freshly wired, in-memory pipeline: the
/// service itself plus the shared `Arc`s its internals hold privately, kept
/// here so tests can inspect store/bus/engine state the service doesn't
/// expose through its own API.
struct Harness {
    svc: Arc<StreamService>,
    cache: Arc<TargetCache>,
    engine: Arc<RecognitionEngine>,
    store: Arc<FormationStore>,
    bus: Arc<SubscriptionBus>,
}

async fn harness_with_preset(preset: Vec<Arc<dyn Rule>>) -> Harness {
    let config = Config::default();
    let cache = Arc::new(TargetCache::new(
        Arc::new(MemoryBackend::new()),
        config.target_ttl,
        config.delta_ttl,
        config.delta_max_per_target,
    ));
    let engine = Arc::new(RecognitionEngine::new(&config, RuleEngine::new()));
    engine.apply_preset(preset).await;
    let store = Arc::new(FormationStore::new(Arc::new(MemoryFormationBackend::new()), config.formation_ttl));
    let bus = Arc::new(SubscriptionBus::new());
    let svc = Arc::new(StreamService::new(
        cache.clone(),
        engine.clone(),
        store.clone(),
        bus.clone(),
        config.recognize_interval,
    ));
    Harness { svc, cache, engine, store, bus }
}

/// A short synthetic track: `points` states, `step` apart, starting at
/// `base`, all at the same position/heading/speed (enough to exercise the
/// recognition window without modelling real motion).
fn synthetic_track(
    target_id: Uuid,
    attributes: TargetAttributes,
    base: DateTime<Utc>,
    lon: f64,
    lat: f64,
    alt: f64,
    heading: f64,
    speed: f64,
    points: i64,
    step_secs: i64,
) -> Vec<InboundTarget> {
    (0..points)
        .map(|i| InboundTarget {
            target_id,
            state: state(base + ChronoDuration::seconds(i * step_secs), lon, lat, alt, heading, speed),
            attributes: Some(attributes.clone()),
        })
        .collect()
}

/// (a) Four tight fighters form up; (b) a hostile fifth target never joins.
#[tokio::test]
async fn tight_fighters_form_up_while_hostile_target_is_excluded() {
    let h = harness_with_preset(presets::tight_fighter()).await;
    let rx = h.bus.connect("watcher");

    let base = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    let blue_offsets = [(116.400, 39.900), (116.405, 39.902), (116.398, 39.898), (116.402, 39.901)];
    let blue_ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();

    let mut records = Vec::new();
    for (id, (lon, lat)) in blue_ids.iter().zip(blue_offsets) {
        records.extend(synthetic_track(*id, fighter("BLUE"), base, lon, lat, 5000.0, 90.0, 250.0, 12, 10));
    }
    let red_id = Uuid::new_v4();
    records.extend(synthetic_track(red_id, fighter("RED"), base, 116.500, 39.800, 6000.0, 90.0, 250.0, 12, 10));

    let ack = h.svc.push(records).await.unwrap();
    assert_eq!(ack.received, 4 * 12 + 12);

    let formations = h.store.latest(5).await.unwrap();
    assert_eq!(formations.len(), 1, "expected exactly one formation");
    let formation = &formations[0];
    assert_eq!(formation.formation_type, "Fighter Section");
    assert_eq!(formation.members.len(), 4);
    assert!(formation.members.iter().all(|m| blue_ids.contains(&m.target_id)));
    assert!(!formation.members.iter().any(|m| m.target_id == red_id));
    assert!(formation.confidence > 0.5);

    // broadcast reached the already-connected watcher without a subscribe step
    assert!(rx.try_recv().is_ok());
}

/// (c) Two otherwise-matching fighters with dissimilar speeds never persist
/// into a formation under `tight_fighter`'s speed bound.
#[tokio::test]
async fn dissimilar_speeds_never_form_a_pair() {
    let h = harness_with_preset(presets::tight_fighter()).await;
    let base = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    let mut records = synthetic_track(a, fighter("BLUE"), base, 116.400, 39.900, 5000.0, 90.0, 250.0, 12, 10);
    records.extend(synthetic_track(b, fighter("BLUE"), base, 116.402, 39.901, 5000.0, 90.0, 300.0, 12, 10));

    h.svc.push(records).await.unwrap();

    let formations = h.store.latest(5).await.unwrap();
    assert!(formations.is_empty(), "dissimilar-speed pair should never persist into a formation");
}

/// (d) Two fighters on reciprocal headings pass a heading rule configured
/// to allow it, at lower confidence than the same-direction case.
#[test]
fn reciprocal_headings_pass_at_lower_confidence_than_matched_heading() {
    let rule = HeadingRule::new("Heading", Priority::High, HeadingParams { max_delta: 15.0, allow_reciprocal: true });
    let segment_gap = ChronoDuration::seconds(120);
    let track1 = TargetTrack::new(Uuid::new_v4(), segment_gap);
    let track2 = TargetTrack::new(Uuid::new_v4(), segment_gap);
    let attrs1 = TargetAttributes::default();
    let attrs2 = TargetAttributes::default();
    let now = Utc::now();
    let params = HashMap::new();

    let s1 = state(now, 116.4, 39.9, 5000.0, 90.0, 250.0);

    let s2_reciprocal = state(now, 116.4, 39.9, 5000.0, 270.0, 250.0);
    let reciprocal = rule.evaluate(&RuleContext {
        track1: &track1,
        track2: &track2,
        state1: &s1,
        state2: &s2_reciprocal,
        attributes1: &attrs1,
        attributes2: &attrs2,
        features1: None,
        features2: None,
        current_time: now,
        params: &params,
    });
    assert!(reciprocal.passed);

    let s2_matched = state(now, 116.4, 39.9, 5000.0, 95.0, 250.0);
    let matched = rule.evaluate(&RuleContext {
        track1: &track1,
        track2: &track2,
        state1: &s1,
        state2: &s2_matched,
        attributes1: &attrs1,
        attributes2: &attrs2,
        features1: None,
        features2: None,
        current_time: now,
        params: &params,
    });
    assert!(matched.passed);
    assert!(reciprocal.confidence < matched.confidence);
}

/// (e) A single batch push large enough to cross the change-ratio
/// threshold triggers recognition synchronously: by the time `push`
/// returns, the pending set is drained and a connected client has already
/// received `FORMATION_DETECTED`.
#[tokio::test]
async fn a_large_enough_batch_triggers_recognition_within_the_push_call() {
    let h = harness_with_preset(presets::tight_fighter()).await;
    let rx = h.bus.connect("watcher");

    let base = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    let offsets = [(116.400, 39.900), (116.402, 39.901), (116.398, 39.899)];
    let mut records = Vec::new();
    for (lon, lat) in offsets {
        records.extend(synthetic_track(Uuid::new_v4(), fighter("BLUE"), base, lon, lat, 5000.0, 90.0, 250.0, 12, 10));
    }

    h.svc.push(records).await.unwrap();

    assert_eq!(h.engine.pending_len(), 0, "a triggered run drains the pending set");
    assert!(rx.try_recv().is_ok(), "subscriber should already have the formation event");
}

/// (f) Delta-sync round trip through the same cache a stream push writes
/// to: full sync, one update, a sync that sees only the change, then a
/// sync against the new baseline that sees nothing.
#[tokio::test]
async fn delta_sync_round_trip_against_a_cache_fed_by_the_stream_service() {
    let h = harness_with_preset(Vec::new()).await;
    let sync = DeltaSyncService::new(h.cache.clone(), Config::default().session_ttl);

    let target = Uuid::new_v4();
    let t0 = Utc::now();
    h.svc
        .push(vec![InboundTarget {
            target_id: target,
            state: state(t0, 116.4, 39.9, 5000.0, 90.0, 250.0),
            attributes: Some(fighter("BLUE")),
        }])
        .await
        .unwrap();

    let full = sync.pull_full(None).await.unwrap();
    assert_eq!(full.versions.len(), 1);

    h.svc
        .push(vec![InboundTarget {
            target_id: target,
            state: state(t0 + ChronoDuration::seconds(5), 116.41, 39.9, 5000.0, 90.0, 250.0),
            attributes: Some(fighter("BLUE")),
        }])
        .await
        .unwrap();

    let delta = sync.pull(None, None, Some(full.versions.clone())).await.unwrap();
    assert_eq!(delta.targets.len(), 1);
    assert!(delta.targets.contains_key(&target));
    let new_version = delta.current_versions[&target];
    assert!(new_version > full.versions[&target]);

    let mut new_versions = HashMap::new();
    new_versions.insert(target, new_version);
    let quiet = sync.pull(None, None, Some(new_versions)).await.unwrap();
    assert!(quiet.targets.is_empty());
}
