//! `/cache/sync/*`: session-scoped delta sync, delegating to
//! [`crate::sync::DeltaSyncService`].

use crate::errors::ServiceResult;
use crate::sync::{CompareResult, DeltaPackage};
use crate::web::AppState;
use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub client_id: String,
    #[serde(default)]
    pub target_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> ServiceResult<Json<CreateSessionResponse>> {
    let session_id = state.sync.create_session(request.client_id, request.target_ids);
    Ok(Json(CreateSessionResponse { session_id }))
}

#[derive(Debug, Deserialize)]
pub struct PullRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub target_ids: Option<Vec<Uuid>>,
    #[serde(default)]
    pub since_versions: Option<HashMap<Uuid, u64>>,
}

pub async fn pull(
    State(state): State<AppState>,
    Json(request): Json<PullRequest>,
) -> ServiceResult<Json<DeltaPackage>> {
    let package = state
        .sync
        .pull(request.session_id.as_deref(), request.target_ids, request.since_versions)
        .await?;
    Ok(Json(package))
}

#[derive(Debug, Deserialize)]
pub struct CompareRequest {
    pub client_versions: HashMap<Uuid, u64>,
}

pub async fn compare(
    State(state): State<AppState>,
    Json(request): Json<CompareRequest>,
) -> ServiceResult<Json<CompareResult>> {
    let result = state.sync.compare_and_sync(&request.client_versions).await?;
    Ok(Json(result))
}
