//! Storage-shape contract the target cache drives. Two implementations
//! exist: an in-memory one (`memory`, dashmap + moka, used in tests and as
//! a single-process fallback) and a Redis one (`redis_backend`,
//! implementing the literal keyspace persisted-state layout).

use super::delta::DeltaEvent;
use crate::attributes::TargetState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

/// The cache entry for a target, as stored by the backend.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CachedTarget {
    pub state: TargetState,
    pub version: u64,
    pub hash: u64,
    pub last_touched: DateTime<Utc>,
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn put_target(&self, target_id: Uuid, entry: CachedTarget, ttl: Duration) -> anyhow::Result<()>;

    async fn get_target(&self, target_id: Uuid) -> anyhow::Result<Option<CachedTarget>>;

    async fn delete_target(&self, target_id: Uuid) -> anyhow::Result<()>;

    /// Enumerates active target ids by key scan; must never materialise a
    /// cross-product of targets and delta events.
    async fn all_target_ids(&self) -> anyhow::Result<Vec<Uuid>>;

    async fn append_delta(
        &self,
        target_id: Uuid,
        event: DeltaEvent,
        max_len: usize,
        ttl: Duration,
    ) -> anyhow::Result<()>;

    async fn delta_since(
        &self,
        target_id: Uuid,
        since_version: u64,
        limit: Option<usize>,
    ) -> anyhow::Result<Vec<DeltaEvent>>;

    async fn delta_in_range(
        &self,
        target_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<DeltaEvent>>;
}
