//! `POST /recognize` and `POST /recognize/incremental`. The former is a
//! stateless bulk call: the caller posts a full batch of target
//! histories and gets back whatever formations that batch implies, with
//! no effect on server-side state. The latter folds the batch into the
//! persistent recognition engine and forces an immediate run, the way
//! the stream service's push path does for a throttled/immediate trigger.

use crate::attributes::{TargetAttributes, TargetState};
use crate::errors::{ServiceError, ServiceResult};
use crate::formation::Formation;
use crate::recognition::{self, algorithm::RecognitionParams};
use crate::rules::RuleEngine;
use crate::stream::InboundTarget;
use crate::track::TargetTrack;
use crate::web::AppState;
use axum::Json;
use axum::extract::State;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct TargetRecord {
    pub target_id: Uuid,
    /// History points for this target, oldest first.
    pub states: Vec<TargetState>,
    #[serde(default)]
    pub attributes: Option<TargetAttributes>,
}

#[derive(Debug, Deserialize)]
pub struct RecognizeRequest {
    pub targets: Vec<TargetRecord>,
    /// Named rule preset to evaluate against; defaults to `tight_fighter`.
    #[serde(default)]
    pub preset: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RecognizeResponse {
    pub success: bool,
    pub message: String,
    pub formation_count: usize,
    pub formations: Vec<Formation>,
    pub processing_time_ms: u64,
    pub metadata: RecognizeMetadata,
}

#[derive(Debug, Serialize)]
pub struct RecognizeMetadata {
    pub targets_considered: usize,
    pub preset: String,
}

fn build_tracks(
    targets: Vec<TargetRecord>,
    segment_gap: chrono::Duration,
) -> ServiceResult<(HashMap<Uuid, TargetTrack>, HashMap<Uuid, TargetAttributes>)> {
    let mut tracks = HashMap::new();
    let mut attributes = HashMap::new();
    for record in targets {
        if record.states.is_empty() {
            return Err(ServiceError::invalid(format!(
                "target {} has no states",
                record.target_id
            )));
        }
        let mut track = TargetTrack::new(record.target_id, segment_gap);
        for state in record.states {
            track.add_state(state, false);
        }
        tracks.insert(record.target_id, track);
        attributes.insert(record.target_id, record.attributes.unwrap_or_default());
    }
    Ok((tracks, attributes))
}

/// Stateless bulk recognition: every target's entire posted history is
/// the track, the window spans it end to end, and nothing is persisted.
pub async fn recognize(
    State(state): State<AppState>,
    Json(request): Json<RecognizeRequest>,
) -> ServiceResult<Json<RecognizeResponse>> {
    let started = Instant::now();
    let preset_name = request.preset.clone().unwrap_or_else(|| "tight_fighter".to_string());
    let preset = crate::rules::presets::by_name(&preset_name)
        .ok_or_else(|| ServiceError::invalid(format!("unknown preset: {preset_name}")))?;

    let targets_considered = request.targets.len();
    let segment_gap =
        Duration::from_std(state.config.segment_gap).unwrap_or(Duration::seconds(120));
    let (tracks, attributes) = build_tracks(request.targets, segment_gap)?;

    let rule_engine = RuleEngine::with_rules(preset);
    let params = RecognitionParams {
        sampling_step: Duration::from_std(state.config.sampling_step).unwrap_or(Duration::seconds(10)),
        persistence_threshold: state.config.persistence_threshold,
        min_formation_duration: Duration::from_std(state.config.min_formation_duration)
            .unwrap_or(Duration::seconds(30)),
        min_track_points: state.config.min_track_points,
    };

    let formations = recognition::recognize(&tracks, &attributes, None, &rule_engine, &params, None);

    Ok(Json(RecognizeResponse {
        success: true,
        message: format!("recognition complete, {} formation(s) found", formations.len()),
        formation_count: formations.len(),
        formations,
        processing_time_ms: started.elapsed().as_millis() as u64,
        metadata: RecognizeMetadata { targets_considered, preset: preset_name },
    }))
}

#[derive(Debug, Deserialize)]
pub struct IncrementalRequest {
    pub targets: Vec<IncrementalTarget>,
}

#[derive(Debug, Deserialize)]
pub struct IncrementalTarget {
    pub target_id: Uuid,
    pub state: TargetState,
    #[serde(default)]
    pub attributes: Option<TargetAttributes>,
}

#[derive(Debug, Serialize)]
pub struct IncrementalResponse {
    pub success: bool,
    pub message: String,
    pub formation_count: usize,
    pub formations: Vec<Formation>,
    pub processing_time_ms: u64,
}

/// Folds the posted states into the persistent engine via the same path
/// as a stream push, then forces an immediate recognition run and
/// returns whatever it found (in addition to the usual store/broadcast
/// side effects a push has).
pub async fn recognize_incremental(
    State(state): State<AppState>,
    Json(request): Json<IncrementalRequest>,
) -> ServiceResult<Json<IncrementalResponse>> {
    let started = Instant::now();
    let records: Vec<InboundTarget> = request
        .targets
        .into_iter()
        .map(|t| InboundTarget { target_id: t.target_id, state: t.state, attributes: t.attributes })
        .collect();

    state.stream.push(records).await?;
    let formations = state.engine.run(true, None).await.unwrap_or_default();
    for formation in &formations {
        if let Err(err) = state.store.store(formation).await {
            tracing::warn!(error = %err, "failed to persist incrementally recognised formation");
        } else {
            state.bus.broadcast_formation(formation.clone());
        }
    }

    Ok(Json(IncrementalResponse {
        success: true,
        message: format!("incremental recognition complete, {} formation(s) found", formations.len()),
        formation_count: formations.len(),
        formations,
        processing_time_ms: started.elapsed().as_millis() as u64,
    }))
}
