//! Redis-backed `FormationStoreBackend`: a hash per formation, a global
//! timeline sorted set, and per-date sorted sets, matching
//! `original_source/cache/formation_store.py`.

use super::backend::{CleanupStats, FormationStoreBackend};
use crate::formation::Formation;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::time::Duration;
use uuid::Uuid;

const KEY_PREFIX: &str = "formation";
const TIMELINE_KEY: &str = "formation:formations:timeline";

pub struct RedisFormationBackend {
    conn: MultiplexedConnection,
}

impl RedisFormationBackend {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        Ok(Self { conn })
    }

    fn formation_key(id: Uuid) -> String {
        format!("{KEY_PREFIX}:formation:{id}")
    }

    fn daily_key(date_str: &str) -> String {
        format!("{KEY_PREFIX}:formations:daily:{date_str}")
    }
}

#[async_trait]
impl FormationStoreBackend for RedisFormationBackend {
    async fn store(&self, formation: &Formation, ttl: Duration) -> anyhow::Result<Uuid> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(formation)?;
        let score = formation.created_at.timestamp() as f64;
        let date_str = formation.created_at.format("%Y%m%d").to_string();
        let key = Self::formation_key(formation.id);
        let daily_key = Self::daily_key(&date_str);

        redis::pipe()
            .atomic()
            .hset(&key, "payload", &payload)
            .expire(&key, ttl.as_secs() as i64)
            .zadd(TIMELINE_KEY, formation.id.to_string(), score)
            .zadd(&daily_key, formation.id.to_string(), score)
            .expire(&daily_key, ttl.as_secs() as i64)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(formation.id)
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Formation>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.hget(Self::formation_key(id), "payload").await?;
        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<()> {
        let formation = self.get(id).await?;
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().del(Self::formation_key(id)).zrem(TIMELINE_KEY, id.to_string());
        if let Some(f) = formation {
            let date_str = f.created_at.format("%Y%m%d").to_string();
            pipe.zrem(Self::daily_key(&date_str), id.to_string());
        }
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn latest(&self, n: usize) -> anyhow::Result<Vec<Formation>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.zrevrange(TIMELINE_KEY, 0, n as isize - 1).await?;
        let mut out = Vec::new();
        for id in ids {
            if let Ok(uuid) = id.parse()
                && let Some(f) = self.get(uuid).await?
            {
                out.push(f);
            }
        }
        Ok(out)
    }

    async fn by_time_range(&self, start: DateTime<Utc>, end: DateTime<Utc>, limit: usize) -> anyhow::Result<Vec<Formation>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn
            .zrangebyscore(TIMELINE_KEY, start.timestamp() as f64, end.timestamp() as f64)
            .await?;
        let mut out = Vec::new();
        for id in ids.into_iter().take(limit) {
            if let Ok(uuid) = id.parse()
                && let Some(f) = self.get(uuid).await?
            {
                out.push(f);
            }
        }
        Ok(out)
    }

    async fn by_date(&self, date: NaiveDate, limit: usize) -> anyhow::Result<Vec<Formation>> {
        let mut conn = self.conn.clone();
        let date_str = date.format("%Y%m%d").to_string();
        let ids: Vec<String> = conn.zrevrange(Self::daily_key(&date_str), 0, limit as isize - 1).await?;
        let mut out = Vec::new();
        for id in ids {
            if let Ok(uuid) = id.parse()
                && let Some(f) = self.get(uuid).await?
            {
                out.push(f);
            }
        }
        Ok(out)
    }

    async fn cleanup_expired(&self, retention: Duration) -> anyhow::Result<CleanupStats> {
        let mut conn = self.conn.clone();
        let mut stats = CleanupStats::default();

        let all_ids: Vec<String> = conn.zrangebyscore(TIMELINE_KEY, 0, Utc::now().timestamp() as f64).await?;
        let mut orphans = Vec::new();
        for id in &all_ids {
            let exists: bool = conn.exists(Self::formation_key(id.parse().unwrap_or_default())).await?;
            if !exists {
                orphans.push(id.clone());
            }
        }
        if !orphans.is_empty() {
            let _: () = conn.zrem(TIMELINE_KEY, &orphans).await?;
            stats.orphan_indexes_cleaned = orphans.len();
        }

        let cutoff = Utc::now() - chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::days(7));
        for days_ago in 0..30 {
            let check_date = Utc::now().date_naive() - chrono::Duration::days(days_ago);
            if check_date >= cutoff.date_naive() {
                continue;
            }
            let key = Self::daily_key(&check_date.format("%Y%m%d").to_string());
            let count: isize = conn.zcard(&key).await?;
            if count > 0 {
                let _: () = conn.del(&key).await?;
                stats.stale_daily_indexes_removed += 1;
            }
        }

        Ok(stats)
    }
}
