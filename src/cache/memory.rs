//! In-memory `CacheBackend`, backed by `dashmap` for per-key locking.
//! Used as the default backend when no Redis URL is configured, and
//! exercised by the cache test suite since no external service is
//! available to the test harness.

use super::backend::{CacheBackend, CachedTarget};
use super::delta::DeltaEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use uuid::Uuid;

struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

pub struct MemoryBackend {
    targets: DashMap<Uuid, Expiring<CachedTarget>>,
    deltas: DashMap<Uuid, Expiring<VecDeque<DeltaEvent>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            targets: DashMap::new(),
            deltas: DashMap::new(),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn put_target(&self, target_id: Uuid, entry: CachedTarget, ttl: Duration) -> anyhow::Result<()> {
        self.targets.insert(
            target_id,
            Expiring {
                value: entry,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get_target(&self, target_id: Uuid) -> anyhow::Result<Option<CachedTarget>> {
        match self.targets.get(&target_id) {
            Some(e) if e.expires_at > Instant::now() => Ok(Some(e.value.clone())),
            Some(_) => {
                self.targets.remove(&target_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete_target(&self, target_id: Uuid) -> anyhow::Result<()> {
        self.targets.remove(&target_id);
        Ok(())
    }

    async fn all_target_ids(&self) -> anyhow::Result<Vec<Uuid>> {
        let now = Instant::now();
        Ok(self
            .targets
            .iter()
            .filter(|e| e.expires_at > now)
            .map(|e| *e.key())
            .collect())
    }

    async fn append_delta(
        &self,
        target_id: Uuid,
        event: DeltaEvent,
        max_len: usize,
        ttl: Duration,
    ) -> anyhow::Result<()> {
        let mut entry = self.deltas.entry(target_id).or_insert_with(|| Expiring {
            value: VecDeque::new(),
            expires_at: Instant::now() + ttl,
        });
        entry.expires_at = Instant::now() + ttl;
        entry.value.push_back(event);
        while entry.value.len() > max_len {
            entry.value.pop_front();
        }
        Ok(())
    }

    async fn delta_since(
        &self,
        target_id: Uuid,
        since_version: u64,
        limit: Option<usize>,
    ) -> anyhow::Result<Vec<DeltaEvent>> {
        let Some(entry) = self.deltas.get(&target_id) else {
            return Ok(Vec::new());
        };
        if entry.expires_at <= Instant::now() {
            return Ok(Vec::new());
        }
        let mut events: Vec<DeltaEvent> = entry
            .value
            .iter()
            .filter(|e| e.version > since_version)
            .cloned()
            .collect();
        if let Some(limit) = limit {
            let drop = events.len().saturating_sub(limit);
            events.drain(0..drop);
        }
        Ok(events)
    }

    async fn delta_in_range(
        &self,
        target_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<DeltaEvent>> {
        let Some(entry) = self.deltas.get(&target_id) else {
            return Ok(Vec::new());
        };
        Ok(entry
            .value
            .iter()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::TargetState;
    use crate::geo::GeoPosition;

    fn target(version: u64) -> CachedTarget {
        CachedTarget {
            state: TargetState {
                timestamp: Utc::now(),
                position: GeoPosition::new(0.0, 0.0, 0.0),
                heading: 0.0,
                speed: 0.0,
                pitch: None,
                roll: None,
            },
            version,
            hash: 0,
            last_touched: Utc::now(),
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let backend = MemoryBackend::new();
        let id = Uuid::new_v4();
        backend
            .put_target(id, target(1), Duration::from_secs(60))
            .await
            .unwrap();
        let got = backend.get_target(id).await.unwrap().unwrap();
        assert_eq!(got.version, 1);
    }

    #[tokio::test]
    async fn expired_entry_reads_as_absent() {
        let backend = MemoryBackend::new();
        let id = Uuid::new_v4();
        backend
            .put_target(id, target(1), Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(backend.get_target(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delta_log_caps_at_max_len() {
        let backend = MemoryBackend::new();
        let id = Uuid::new_v4();
        for v in 1..=5u64 {
            let event = DeltaEvent::delete(id, v, "test");
            backend
                .append_delta(id, event, 3, Duration::from_secs(60))
                .await
                .unwrap();
        }
        let events = backend.delta_since(id, 0, None).await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events.first().unwrap().version, 3);
    }

    #[tokio::test]
    async fn delta_since_filters_by_version() {
        let backend = MemoryBackend::new();
        let id = Uuid::new_v4();
        for v in 1..=5u64 {
            let event = DeltaEvent::delete(id, v, "test");
            backend
                .append_delta(id, event, 100, Duration::from_secs(60))
                .await
                .unwrap();
        }
        let events = backend.delta_since(id, 3, None).await.unwrap();
        assert_eq!(events.len(), 2);
    }
}
