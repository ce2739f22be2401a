//! `/cache/targets/*` and `/cache/admin/*`: direct reads and writes
//! against the target cache, bypassing recognition entirely.

use crate::attributes::{TargetAttributes, TargetState};
use crate::errors::{ServiceError, ServiceResult};
use crate::stream::{InboundTarget, PushAck};
use crate::web::AppState;
use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct BatchUpdateRequest {
    pub targets: Vec<BatchUpdateTarget>,
}

#[derive(Debug, Deserialize)]
pub struct BatchUpdateTarget {
    pub target_id: Uuid,
    pub state: TargetState,
    #[serde(default)]
    pub attributes: Option<TargetAttributes>,
}

pub async fn batch_update(
    State(state): State<AppState>,
    Json(request): Json<BatchUpdateRequest>,
) -> ServiceResult<Json<PushAck>> {
    let records: Vec<InboundTarget> = request
        .targets
        .into_iter()
        .map(|t| InboundTarget { target_id: t.target_id, state: t.state, attributes: t.attributes })
        .collect();
    let ack = state.stream.push(records).await?;
    Ok(Json(ack))
}

#[derive(Debug, Deserialize)]
pub struct DeltaQuery {
    #[serde(default)]
    pub since_version: Option<u64>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct DeltaResponse {
    pub target_id: Uuid,
    pub current_version: u64,
    pub events: Vec<crate::cache::DeltaEvent>,
}

pub async fn target_delta(
    State(state): State<AppState>,
    Path(target_id): Path<Uuid>,
    Query(query): Query<DeltaQuery>,
) -> ServiceResult<Json<DeltaResponse>> {
    let since_version = query.since_version.unwrap_or(0);
    let mut events = state.cache.delta_since(target_id, since_version).await?;
    if let Some(limit) = query.limit
        && events.len() > limit
    {
        let drop_n = events.len() - limit;
        events.drain(0..drop_n);
    }
    let current_version = state.cache.version_of(target_id).await?;
    Ok(Json(DeltaResponse { target_id, current_version, events }))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

pub async fn target_history(
    State(state): State<AppState>,
    Path(target_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> ServiceResult<Json<Vec<crate::cache::DeltaEvent>>> {
    let events = state.cache.delta_in_range(target_id, query.start, query.end).await?;
    Ok(Json(events))
}

pub async fn active_targets(State(state): State<AppState>) -> ServiceResult<Json<Vec<Uuid>>> {
    let ids = state.cache.all_active().await?;
    Ok(Json(ids))
}

#[derive(Debug, Deserialize)]
pub struct BatchQueryRequest {
    pub target_ids: Vec<Uuid>,
}

pub async fn batch_query(
    State(state): State<AppState>,
    Json(request): Json<BatchQueryRequest>,
) -> ServiceResult<Json<HashMap<Uuid, TargetState>>> {
    let targets = state.cache.get_batch(&request.target_ids).await?;
    Ok(Json(targets))
}

#[derive(Debug, Serialize)]
pub struct TargetStateResponse {
    pub target_id: Uuid,
    pub state: Option<TargetState>,
    pub version: u64,
}

pub async fn target_state(
    State(state): State<AppState>,
    Path(target_id): Path<Uuid>,
) -> ServiceResult<Json<TargetStateResponse>> {
    let target_state = state.cache.get(target_id).await?;
    let version = state.cache.version_of(target_id).await?;
    Ok(Json(TargetStateResponse { target_id, state: target_state, version }))
}

#[derive(Debug, Serialize)]
pub struct AdminCleanupResponse {
    pub formations_cleaned: crate::store::CleanupStats,
}

pub async fn admin_cleanup(State(state): State<AppState>) -> ServiceResult<Json<AdminCleanupResponse>> {
    let formations_cleaned = state.store.cleanup_expired().await.map_err(ServiceError::Backend)?;
    Ok(Json(AdminCleanupResponse { formations_cleaned }))
}

pub async fn admin_status(State(state): State<AppState>) -> ServiceResult<Json<serde_json::Value>> {
    let active = state.cache.all_active().await?;
    let bus_stats = state.bus.stats();
    let pending = state.engine.pending_len();
    let tracks = state.engine.track_count();
    Ok(Json(json!({
        "active_targets": active.len(),
        "pending_recognition": pending,
        "tracks_tracked": tracks,
        "connected_clients": bus_stats.connected_clients,
        "subscribed_targets": bus_stats.subscribed_targets,
    })))
}

/// Clears all cached target state. Intended for test/staging resets; the
/// admin surface has no auth layer of its own, matching the rest of this
/// interface (see DESIGN.md's open-question resolutions).
pub async fn admin_clear(State(state): State<AppState>) -> ServiceResult<Json<serde_json::Value>> {
    let ids = state.cache.all_active().await?;
    let count = ids.len();
    for id in ids {
        state.cache.delete(id, "admin clear").await?;
    }
    Ok(Json(json!({ "cleared": count })))
}

pub async fn cache_health(State(state): State<AppState>) -> ServiceResult<Json<serde_json::Value>> {
    let active = state.cache.all_active().await?;
    Ok(Json(json!({ "status": "ok", "active_targets": active.len() })))
}
