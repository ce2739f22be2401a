//! Storage contract for formations: per-id record, a global time-ordered
//! index, and a per-date index, all TTL'd. Mirrors the original system's
//! `cache/formation_store.py`.

use crate::formation::Formation;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct CleanupStats {
    pub orphan_indexes_cleaned: usize,
    pub stale_daily_indexes_removed: usize,
}

#[async_trait]
pub trait FormationStoreBackend: Send + Sync {
    async fn store(&self, formation: &Formation, ttl: Duration) -> anyhow::Result<Uuid>;
    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Formation>>;
    async fn delete(&self, id: Uuid) -> anyhow::Result<()>;
    async fn latest(&self, n: usize) -> anyhow::Result<Vec<Formation>>;
    async fn by_time_range(&self, start: DateTime<Utc>, end: DateTime<Utc>, limit: usize) -> anyhow::Result<Vec<Formation>>;
    async fn by_date(&self, date: NaiveDate, limit: usize) -> anyhow::Result<Vec<Formation>>;
    /// Sweeps index entries that point to records already gone (TTL'd
    /// out or otherwise removed) and drops date indexes older than
    /// `retention`. Compensates for TTL expiring the body while the
    /// index entry lingers.
    async fn cleanup_expired(&self, retention: Duration) -> anyhow::Result<CleanupStats>;
}
