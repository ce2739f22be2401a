//! The target state cache: current state, monotonic version, and
//! best-effort delta event log per target.

pub mod backend;
pub mod delta;
pub mod memory;
pub mod redis_backend;

pub use backend::{CacheBackend, CachedTarget};
pub use delta::{DeltaEvent, DeltaPayload, StructuredDiff, compute_delta};

use crate::attributes::TargetState;
use crate::errors::ServiceResult;
use crate::track::RecentStateSource;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use uuid::Uuid;

pub enum PutOutcome {
    Created,
    Updated,
}

pub struct PutResult {
    pub outcome: PutOutcome,
    pub version: u64,
    pub delta: Option<DeltaEvent>,
}

/// Guarantees strict per-target monotonicity of versions even when several
/// `put`s for the same target land within the same millisecond, by
/// combining wall-clock milliseconds with a per-target counter floor.
struct VersionGenerator {
    counters: DashMap<Uuid, AtomicU64>,
}

impl VersionGenerator {
    fn new() -> Self {
        Self {
            counters: DashMap::new(),
        }
    }

    fn next(&self, target_id: Uuid) -> u64 {
        let now_ms = Utc::now().timestamp_millis().max(0) as u64;
        let counter = self
            .counters
            .entry(target_id)
            .or_insert_with(|| AtomicU64::new(0));
        loop {
            let last = counter.load(Ordering::SeqCst);
            let candidate = now_ms.max(last + 1);
            if counter
                .compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return candidate;
            }
        }
    }
}

fn content_hash(state: &TargetState) -> u64 {
    let mut hasher = DefaultHasher::new();
    state.timestamp.timestamp_millis().hash(&mut hasher);
    state.position.lon.to_bits().hash(&mut hasher);
    state.position.lat.to_bits().hash(&mut hasher);
    state.position.alt.to_bits().hash(&mut hasher);
    state.heading.to_bits().hash(&mut hasher);
    state.speed.to_bits().hash(&mut hasher);
    hasher.finish()
}

pub struct TargetCache {
    backend: Arc<dyn CacheBackend>,
    versions: VersionGenerator,
    target_ttl: Duration,
    delta_ttl: Duration,
    delta_max_per_target: usize,
}

impl TargetCache {
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        target_ttl: Duration,
        delta_ttl: Duration,
        delta_max_per_target: usize,
    ) -> Self {
        Self {
            backend,
            versions: VersionGenerator::new(),
            target_ttl,
            delta_ttl,
            delta_max_per_target,
        }
    }

    /// Assigns the next version, stores the state, refreshes TTL, and (if
    /// an old state existed and at least one of {position, heading, speed}
    /// changed) appends an UPDATE delta. The version bump itself is
    /// unconditional; only the delta emission is gated on an actual change.
    pub async fn put(&self, target_id: Uuid, state: TargetState) -> ServiceResult<PutResult> {
        let previous = self.backend.get_target(target_id).await?;
        let version = self.versions.next(target_id);
        let hash = content_hash(&state);

        let entry = CachedTarget {
            state: state.clone(),
            version,
            hash,
            last_touched: Utc::now(),
        };
        self.backend
            .put_target(target_id, entry, self.target_ttl)
            .await?;

        let (outcome, delta) = match previous {
            Some(prev) => {
                let diff = compute_delta(&prev.state, &state);
                if diff.changed_fields.is_empty() {
                    (PutOutcome::Updated, None)
                } else {
                    let event = DeltaEvent::update(target_id, version, diff);
                    if let Err(err) = self
                        .backend
                        .append_delta(target_id, event.clone(), self.delta_max_per_target, self.delta_ttl)
                        .await
                    {
                        // Delta log is best-effort: the state + version write already
                        // succeeded, so this is logged and swallowed rather than failing
                        // the put. Readers can always fall back to pullFull.
                        tracing::warn!(target = %target_id, error = %err, "delta append failed after state write");
                    }
                    (PutOutcome::Updated, Some(event))
                }
            }
            None => (PutOutcome::Created, None),
        };

        Ok(PutResult {
            outcome,
            version,
            delta,
        })
    }

    pub async fn get(&self, target_id: Uuid) -> ServiceResult<Option<TargetState>> {
        Ok(self.backend.get_target(target_id).await?.map(|e| e.state))
    }

    pub async fn version_of(&self, target_id: Uuid) -> ServiceResult<u64> {
        Ok(self
            .backend
            .get_target(target_id)
            .await?
            .map(|e| e.version)
            .unwrap_or(0))
    }

    pub async fn get_batch(
        &self,
        ids: &[Uuid],
    ) -> ServiceResult<std::collections::HashMap<Uuid, TargetState>> {
        let mut out = std::collections::HashMap::new();
        for &id in ids {
            if let Some(state) = self.get(id).await? {
                out.insert(id, state);
            }
        }
        Ok(out)
    }

    /// Appends a DELETE delta before removing the state, matching the
    /// original system's ordering (emit, then remove).
    pub async fn delete(&self, target_id: Uuid, reason: impl Into<String>) -> ServiceResult<()> {
        let version = self.versions.next(target_id);
        let event = DeltaEvent::delete(target_id, version, reason);
        if let Err(err) = self
            .backend
            .append_delta(target_id, event, self.delta_max_per_target, self.delta_ttl)
            .await
        {
            tracing::warn!(target = %target_id, error = %err, "delete delta append failed");
        }
        self.backend.delete_target(target_id).await?;
        Ok(())
    }

    pub async fn delta_since(&self, target_id: Uuid, since_version: u64) -> ServiceResult<Vec<DeltaEvent>> {
        Ok(self
            .backend
            .delta_since(target_id, since_version, None)
            .await?)
    }

    pub async fn delta_in_range(
        &self,
        target_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ServiceResult<Vec<DeltaEvent>> {
        Ok(self.backend.delta_in_range(target_id, start, end).await?)
    }

    pub async fn all_active(&self) -> ServiceResult<Vec<Uuid>> {
        Ok(self.backend.all_target_ids().await?)
    }
}

/// Adapts the cache as a [`RecentStateSource`] for `TargetTrack::interpolate`'s
/// near-real-time pull-on-read path. Implemented via `futures::executor`-free
/// blocking is avoided: callers that need this must go through `recent_state_async`;
/// this synchronous trait impl exists only where a cached snapshot was
/// already taken (e.g. recognition's per-run track refresh), not for the
/// hot ingestion path.
pub struct CacheSnapshot(pub std::collections::HashMap<Uuid, TargetState>);

impl RecentStateSource for CacheSnapshot {
    fn recent_state(&self, target_id: Uuid) -> Option<TargetState> {
        self.0.get(&target_id).cloned()
    }
}
