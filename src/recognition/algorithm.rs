//! The stateless recognition algorithm: sample tracks over a window,
//! score every pair, build a graph of persistent pairs, and synthesise
//! formations from its connected components.

use crate::attributes::TargetAttributes;
use crate::formation::{self, Formation, FormationMember, RulePassRate};
use crate::rules::{RuleContext, RuleEngine};
use crate::track::{RecentStateSource, TargetTrack};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct RecognitionParams {
    pub sampling_step: Duration,
    pub persistence_threshold: f64,
    pub min_formation_duration: Duration,
    pub min_track_points: usize,
}

struct PairAggregate {
    passes: u32,
    samples: u32,
    confidence_sum: f64,
    time_first: DateTime<Utc>,
    time_last: DateTime<Utc>,
    per_rule_passes: HashMap<String, u32>,
    per_rule_evals: HashMap<String, u32>,
}

/// Runs one recognition pass over the given tracks. `attributes` must have
/// an entry for every track id; tracks without one are skipped entirely
/// since the attribute/platform rules and formation classification both
/// need them.
pub fn recognize(
    tracks: &HashMap<Uuid, TargetTrack>,
    attributes: &HashMap<Uuid, TargetAttributes>,
    window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    rule_engine: &RuleEngine,
    params: &RecognitionParams,
    recent: Option<&dyn RecentStateSource>,
) -> Vec<Formation> {
    let ids: Vec<Uuid> = tracks.keys().filter(|id| attributes.contains_key(id)).copied().collect();
    if ids.len() < 2 {
        return Vec::new();
    }

    let (start, end) = match window {
        Some(w) => w,
        None => match derive_window(tracks, &ids) {
            Some(w) => w,
            None => return Vec::new(),
        },
    };

    let sample_times = sampled_times(start, end, params.sampling_step);
    if sample_times.is_empty() {
        return Vec::new();
    }

    let mut aggregates: HashMap<(Uuid, Uuid), PairAggregate> = HashMap::new();

    for &t in &sample_times {
        let mut present: Vec<(Uuid, crate::attributes::TargetState)> = Vec::new();
        for &id in &ids {
            if let Some(state) = tracks[&id].interpolate(t, recent) {
                present.push((id, state));
            }
        }

        for i in 0..present.len() {
            for j in (i + 1)..present.len() {
                let (id1, state1) = &present[i];
                let (id2, state2) = &present[j];
                let key = pair_key(*id1, *id2);

                let ctx = RuleContext {
                    track1: &tracks[id1],
                    track2: &tracks[id2],
                    state1,
                    state2,
                    attributes1: &attributes[id1],
                    attributes2: &attributes[id2],
                    features1: None,
                    features2: None,
                    current_time: t,
                    params: &HashMap::new(),
                };
                let eval = rule_engine.evaluate(&ctx);

                let aggregate = aggregates.entry(key).or_insert_with(|| PairAggregate {
                    passes: 0,
                    samples: 0,
                    confidence_sum: 0.0,
                    time_first: t,
                    time_last: t,
                    per_rule_passes: HashMap::new(),
                    per_rule_evals: HashMap::new(),
                });
                aggregate.samples += 1;
                aggregate.time_first = aggregate.time_first.min(t);
                aggregate.time_last = aggregate.time_last.max(t);
                if eval.passed {
                    aggregate.passes += 1;
                    aggregate.confidence_sum += eval.confidence;
                }
                for outcome in &eval.outcomes {
                    *aggregate.per_rule_evals.entry(outcome.rule_name.clone()).or_insert(0) += 1;
                    if outcome.passed {
                        *aggregate.per_rule_passes.entry(outcome.rule_name.clone()).or_insert(0) += 1;
                    }
                }
            }
        }
    }

    let mut edges: HashMap<(Uuid, Uuid), f64> = HashMap::new();
    let mut rule_pass_rates: HashMap<String, (u32, u32)> = HashMap::new();

    for (pair, agg) in &aggregates {
        let persistence = agg.passes as f64 / agg.samples as f64;
        let duration = agg.time_last - agg.time_first;
        if persistence >= params.persistence_threshold && duration >= params.min_formation_duration {
            let avg_confidence = if agg.passes > 0 { agg.confidence_sum / agg.passes as f64 } else { 0.0 };
            edges.insert(*pair, avg_confidence);
            for (name, evals) in &agg.per_rule_evals {
                let passes = agg.per_rule_passes.get(name).copied().unwrap_or(0);
                let entry = rule_pass_rates.entry(name.clone()).or_insert((0, 0));
                entry.0 += passes;
                entry.1 += *evals;
            }
        }
    }

    let components = connected_components(&edges);

    let mut formations = Vec::new();
    for component in components {
        if component.len() < 2 {
            continue;
        }
        let formation = match build_formation(&component, tracks, attributes, start, end, &edges, &rule_pass_rates, params) {
            Some(f) => f,
            None => continue,
        };
        formations.push(formation);
    }
    formations
}

fn pair_key(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a < b { (a, b) } else { (b, a) }
}

fn derive_window(tracks: &HashMap<Uuid, TargetTrack>, ids: &[Uuid]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let mut earliest: Option<DateTime<Utc>> = None;
    let mut latest: Option<DateTime<Utc>> = None;
    for id in ids {
        for segment in tracks[id].segments() {
            for state in segment {
                earliest = Some(earliest.map_or(state.timestamp, |e| e.min(state.timestamp)));
                latest = Some(latest.map_or(state.timestamp, |l| l.max(state.timestamp)));
            }
        }
    }
    match (earliest, latest) {
        (Some(s), Some(e)) => Some((s, e)),
        _ => None,
    }
}

fn sampled_times(start: DateTime<Utc>, end: DateTime<Utc>, step: Duration) -> Vec<DateTime<Utc>> {
    let mut times = Vec::new();
    let mut t = start;
    while t <= end {
        times.push(t);
        if step.is_zero() {
            break;
        }
        t += step;
    }
    times
}

/// Depth-first search over the retained-pair graph; returns vertex sets,
/// including singletons (filtered out by the caller).
fn connected_components(edges: &HashMap<(Uuid, Uuid), f64>) -> Vec<HashSet<Uuid>> {
    let mut adjacency: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for &(a, b) in edges.keys() {
        adjacency.entry(a).or_default().push(b);
        adjacency.entry(b).or_default().push(a);
    }

    let mut visited: HashSet<Uuid> = HashSet::new();
    let mut components = Vec::new();

    for &start in adjacency.keys() {
        if visited.contains(&start) {
            continue;
        }
        let mut component = HashSet::new();
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            if !component.insert(node) {
                continue;
            }
            visited.insert(node);
            if let Some(neighbours) = adjacency.get(&node) {
                for &n in neighbours {
                    if !component.contains(&n) {
                        stack.push(n);
                    }
                }
            }
        }
        components.push(component);
    }
    components
}

fn build_formation(
    component: &HashSet<Uuid>,
    tracks: &HashMap<Uuid, TargetTrack>,
    attributes: &HashMap<Uuid, TargetAttributes>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    edges: &HashMap<(Uuid, Uuid), f64>,
    rule_pass_rates: &HashMap<String, (u32, u32)>,
    params: &RecognitionParams,
) -> Option<Formation> {
    let mut members = Vec::new();
    for &id in component {
        let slice: Vec<_> = tracks[&id].states_in_range(start, end).into_iter().cloned().collect();
        if slice.len() < params.min_track_points {
            continue;
        }
        members.push(FormationMember {
            target_id: id,
            attributes: attributes[&id].clone(),
            joined_at: slice.first().map(|s| s.timestamp).unwrap_or(start),
            track_slice: slice,
        });
    }
    if members.len() < 2 {
        return None;
    }

    let member_ids: HashSet<Uuid> = members.iter().map(|m| m.target_id).collect();
    let internal_weights: Vec<f64> = edges
        .iter()
        .filter(|((a, b), _)| member_ids.contains(a) && member_ids.contains(b))
        .map(|(_, w)| *w)
        .collect();
    let confidence = if internal_weights.is_empty() {
        0.0
    } else {
        internal_weights.iter().sum::<f64>() / internal_weights.len() as f64
    };

    let coordination_graph: HashMap<(Uuid, Uuid), f64> = edges
        .iter()
        .filter(|((a, b), _)| member_ids.contains(a) && member_ids.contains(b))
        .map(|(k, v)| (*k, *v))
        .collect();

    let applied_rules: Vec<String> = rule_pass_rates.keys().cloned().collect();
    let pass_rates = rule_pass_rates
        .iter()
        .map(|(name, (passes, evals))| RulePassRate {
            rule_name: name.clone(),
            pass_rate: if *evals > 0 { *passes as f64 / *evals as f64 } else { 0.0 },
        })
        .collect();

    Some(Formation {
        id: Uuid::new_v4(),
        formation_type: formation::classify_formation_type(&members),
        confidence,
        spatial_summary: formation::spatial_summary(&members),
        motion_summary: formation::motion_summary(&members),
        members,
        time_range: (start, end),
        created_at: Utc::now(),
        applied_rules,
        rule_pass_rates: pass_rates,
        coordination_graph: Some(coordination_graph),
    })
}
