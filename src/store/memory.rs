//! In-memory `FormationStoreBackend`: a `DashMap` of TTL'd records plus a
//! timeline index and per-date indexes held under a mutex, mirroring the
//! sorted-set indexes of the Redis-backed implementation closely enough
//! that `cleanup_expired`'s orphan-sweep behaviour is exercised the same
//! way in tests as it would be against Redis.

use super::backend::{CleanupStats, FormationStoreBackend};
use crate::formation::Formation;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

pub struct MemoryFormationBackend {
    records: DashMap<Uuid, Expiring<Formation>>,
    timeline: Mutex<Vec<(i64, Uuid)>>,
    daily: Mutex<HashMap<String, Vec<(i64, Uuid)>>>,
}

impl MemoryFormationBackend {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            timeline: Mutex::new(Vec::new()),
            daily: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryFormationBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn date_key(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%d").to_string()
}

#[async_trait]
impl FormationStoreBackend for MemoryFormationBackend {
    async fn store(&self, formation: &Formation, ttl: Duration) -> anyhow::Result<Uuid> {
        let id = formation.id;
        let score = formation.created_at.timestamp_millis();

        self.records.insert(
            id,
            Expiring {
                value: formation.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        self.timeline.lock().unwrap().push((score, id));
        self.daily
            .lock()
            .unwrap()
            .entry(date_key(formation.created_at))
            .or_default()
            .push((score, id));
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Formation>> {
        match self.records.get(&id) {
            Some(e) if e.expires_at > Instant::now() => Ok(Some(e.value.clone())),
            _ => Ok(None),
        }
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<()> {
        self.records.remove(&id);
        self.timeline.lock().unwrap().retain(|(_, fid)| *fid != id);
        for entries in self.daily.lock().unwrap().values_mut() {
            entries.retain(|(_, fid)| *fid != id);
        }
        Ok(())
    }

    async fn latest(&self, n: usize) -> anyhow::Result<Vec<Formation>> {
        let mut entries = self.timeline.lock().unwrap().clone();
        entries.sort_by(|a, b| b.0.cmp(&a.0));
        let mut out = Vec::new();
        for (_, id) in entries {
            if out.len() >= n {
                break;
            }
            if let Some(f) = self.get(id).await? {
                out.push(f);
            }
        }
        Ok(out)
    }

    async fn by_time_range(&self, start: DateTime<Utc>, end: DateTime<Utc>, limit: usize) -> anyhow::Result<Vec<Formation>> {
        let start_ms = start.timestamp_millis();
        let end_ms = end.timestamp_millis();
        let mut entries: Vec<(i64, Uuid)> = self
            .timeline
            .lock()
            .unwrap()
            .iter()
            .filter(|(score, _)| *score >= start_ms && *score <= end_ms)
            .cloned()
            .collect();
        entries.sort_by_key(|(score, _)| *score);
        entries.truncate(limit);

        let mut out = Vec::new();
        for (_, id) in entries {
            if let Some(f) = self.get(id).await? {
                out.push(f);
            }
        }
        Ok(out)
    }

    async fn by_date(&self, date: NaiveDate, limit: usize) -> anyhow::Result<Vec<Formation>> {
        let key = date.format("%Y%m%d").to_string();
        let mut entries = self.daily.lock().unwrap().get(&key).cloned().unwrap_or_default();
        entries.sort_by(|a, b| b.0.cmp(&a.0));
        entries.truncate(limit);

        let mut out = Vec::new();
        for (_, id) in entries {
            if let Some(f) = self.get(id).await? {
                out.push(f);
            }
        }
        Ok(out)
    }

    async fn cleanup_expired(&self, retention: Duration) -> anyhow::Result<CleanupStats> {
        let mut stats = CleanupStats::default();

        let live_ids: std::collections::HashSet<Uuid> = self.records.iter().map(|e| *e.key()).collect();
        {
            let mut timeline = self.timeline.lock().unwrap();
            let before = timeline.len();
            timeline.retain(|(_, id)| live_ids.contains(id));
            stats.orphan_indexes_cleaned += before - timeline.len();
        }

        let cutoff = Utc::now() - chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::days(7));
        let mut daily = self.daily.lock().unwrap();
        let mut stale_keys = Vec::new();
        for key in daily.keys() {
            if let Ok(date) = NaiveDate::parse_from_str(key, "%Y%m%d")
                && date < cutoff.date_naive()
            {
                stale_keys.push(key.clone());
            }
        }
        for key in stale_keys {
            daily.remove(&key);
            stats.stale_daily_indexes_removed += 1;
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formation::{BoundingBox, MotionSummary, SpatialSummary};
    use crate::geo::AltitudeLayer;

    fn formation_at(created_at: DateTime<Utc>) -> Formation {
        Formation {
            id: Uuid::new_v4(),
            formation_type: "Fighter Section".to_string(),
            confidence: 0.9,
            members: Vec::new(),
            time_range: (created_at, created_at),
            created_at,
            spatial_summary: SpatialSummary {
                centre_lon: 0.0,
                centre_lat: 0.0,
                bounding_box: BoundingBox { min_lon: 0.0, min_lat: 0.0, max_lon: 0.0, max_lat: 0.0 },
                coverage_area_km2: 0.0,
            },
            motion_summary: MotionSummary {
                mean_speed: 0.0,
                std_speed: 0.0,
                mean_heading: 0.0,
                std_heading: 0.0,
                altitude_layer: AltitudeLayer::Medium,
                cohesion: 0.0,
            },
            applied_rules: Vec::new(),
            rule_pass_rates: Vec::new(),
            coordination_graph: None,
        }
    }

    #[tokio::test]
    async fn store_then_get_round_trips() {
        let backend = MemoryFormationBackend::new();
        let formation = formation_at(Utc::now());
        let id = backend.store(&formation, Duration::from_secs(60)).await.unwrap();
        let got = backend.get(id).await.unwrap().unwrap();
        assert_eq!(got.id, id);
    }

    #[tokio::test]
    async fn latest_returns_newest_first() {
        let backend = MemoryFormationBackend::new();
        let older = formation_at(DateTime::from_timestamp(1000, 0).unwrap());
        let newer = formation_at(DateTime::from_timestamp(2000, 0).unwrap());
        backend.store(&older, Duration::from_secs(60)).await.unwrap();
        backend.store(&newer, Duration::from_secs(60)).await.unwrap();
        let latest = backend.latest(1).await.unwrap();
        assert_eq!(latest[0].id, newer.id);
    }

    #[tokio::test]
    async fn cleanup_removes_orphan_timeline_entries() {
        let backend = MemoryFormationBackend::new();
        let formation = formation_at(Utc::now());
        backend.store(&formation, Duration::from_millis(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let stats = backend.cleanup_expired(Duration::from_secs(604_800)).await.unwrap();
        assert_eq!(stats.orphan_indexes_cleaned, 1);
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let backend = MemoryFormationBackend::new();
        let formation = formation_at(Utc::now());
        backend.store(&formation, Duration::from_millis(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        backend.cleanup_expired(Duration::from_secs(604_800)).await.unwrap();
        let second = backend.cleanup_expired(Duration::from_secs(604_800)).await.unwrap();
        assert_eq!(second.orphan_indexes_cleaned, 0);
    }
}
