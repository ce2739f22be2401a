//! `/cache/formations/*`: reads against the formation store.

use crate::errors::{ServiceError, ServiceResult};
use crate::formation::Formation;
use crate::store::FormationStatistics;
use crate::web::AppState;
use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    #[serde(default = "default_recent_limit")]
    pub limit: usize,
}

fn default_recent_limit() -> usize {
    50
}

pub async fn recent(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> ServiceResult<Json<Vec<Formation>>> {
    let formations = state.store.latest(query.limit).await.map_err(ServiceError::Backend)?;
    Ok(Json(formations))
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default = "default_recent_limit")]
    pub limit: usize,
}

pub async fn range(
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> ServiceResult<Json<Vec<Formation>>> {
    let formations = state
        .store
        .by_time_range(query.start, query.end, query.limit)
        .await
        .map_err(ServiceError::Backend)?;
    Ok(Json(formations))
}

pub async fn by_date(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> ServiceResult<Json<Vec<Formation>>> {
    let date = NaiveDate::parse_from_str(&date, "%Y%m%d")
        .map_err(|_| ServiceError::invalid(format!("invalid date {date}, expected YYYYMMDD")))?;
    let formations = state.store.by_date(date, 1000).await.map_err(ServiceError::Backend)?;
    Ok(Json(formations))
}

pub async fn by_id(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ServiceResult<Json<Formation>> {
    state
        .store
        .get(id)
        .await
        .map_err(ServiceError::Backend)?
        .map(Json)
        .ok_or_else(|| ServiceError::invalid(format!("no formation with id {id}")))
}

#[derive(Debug, Deserialize)]
pub struct StatisticsQuery {
    #[serde(default = "default_statistics_days")]
    pub days: i64,
}

fn default_statistics_days() -> i64 {
    7
}

pub async fn statistics_overview(
    State(state): State<AppState>,
    Query(query): Query<StatisticsQuery>,
) -> ServiceResult<Json<FormationStatistics>> {
    let stats = state.store.statistics(query.days).await.map_err(ServiceError::Backend)?;
    Ok(Json(stats))
}
