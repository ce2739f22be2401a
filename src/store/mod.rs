//! Time-indexed, TTL'd store of recognition results.

pub mod backend;
pub mod memory;
pub mod redis_backend;

pub use backend::{CleanupStats, FormationStoreBackend};

use crate::formation::Formation;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize)]
pub struct FormationStatistics {
    pub total_count: usize,
    pub daily_counts: HashMap<String, usize>,
    pub type_distribution: HashMap<String, usize>,
    pub avg_confidence: f64,
}

pub struct FormationStore {
    backend: Arc<dyn FormationStoreBackend>,
    ttl: Duration,
}

impl FormationStore {
    pub fn new(backend: Arc<dyn FormationStoreBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    pub async fn store(&self, formation: &Formation) -> anyhow::Result<Uuid> {
        self.backend.store(formation, self.ttl).await
    }

    pub async fn get(&self, id: Uuid) -> anyhow::Result<Option<Formation>> {
        self.backend.get(id).await
    }

    pub async fn delete(&self, id: Uuid) -> anyhow::Result<()> {
        self.backend.delete(id).await
    }

    pub async fn latest(&self, n: usize) -> anyhow::Result<Vec<Formation>> {
        self.backend.latest(n).await
    }

    pub async fn by_time_range(&self, start: DateTime<Utc>, end: DateTime<Utc>, limit: usize) -> anyhow::Result<Vec<Formation>> {
        self.backend.by_time_range(start, end, limit).await
    }

    pub async fn by_date(&self, date: NaiveDate, limit: usize) -> anyhow::Result<Vec<Formation>> {
        self.backend.by_date(date, limit).await
    }

    /// Daily counts, type distribution, and mean confidence over the
    /// last `days` days, capped at 1000 formations sampled per day.
    pub async fn statistics(&self, days: i64) -> anyhow::Result<FormationStatistics> {
        let mut stats = FormationStatistics::default();
        let mut total_confidence = 0.0;
        let mut confidence_count = 0usize;

        for i in 0..days {
            let date = (Utc::now() - chrono::Duration::days(i)).date_naive();
            let date_str = date.format("%Y%m%d").to_string();
            let formations = self.backend.by_date(date, 1000).await?;

            stats.daily_counts.insert(date_str, formations.len());
            stats.total_count += formations.len();

            for f in &formations {
                *stats.type_distribution.entry(f.formation_type.clone()).or_insert(0) += 1;
                total_confidence += f.confidence;
                confidence_count += 1;
            }
        }

        if confidence_count > 0 {
            stats.avg_confidence = total_confidence / confidence_count as f64;
        }
        Ok(stats)
    }

    pub async fn cleanup_expired(&self) -> anyhow::Result<CleanupStats> {
        self.backend.cleanup_expired(self.ttl).await
    }
}
