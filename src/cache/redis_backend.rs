//! Redis-backed `CacheBackend`, implementing the persisted-state keyspace:
//! `formation:target:{id}` (hash), `formation:target:{id}:version`
//! (string), `formation:delta:{id}` (capped stream). Mirrors the original
//! Python system's `cache/redis_client.py` / `cache/target_cache.py`.

use super::backend::{CacheBackend, CachedTarget};
use super::delta::DeltaEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamMaxlen, StreamRangeReply};
use redis::{AsyncCommands, Client};
use std::time::Duration;
use uuid::Uuid;

const KEY_PREFIX: &str = "formation";
const ACTIVE_INDEX_KEY: &str = "formation:targets:index";

pub struct RedisBackend {
    conn: MultiplexedConnection,
}

impl RedisBackend {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        Ok(Self { conn })
    }

    fn target_key(id: Uuid) -> String {
        format!("{KEY_PREFIX}:target:{id}")
    }

    fn version_key(id: Uuid) -> String {
        format!("{KEY_PREFIX}:target:{id}:version")
    }

    fn delta_key(id: Uuid) -> String {
        format!("{KEY_PREFIX}:delta:{id}")
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn put_target(&self, target_id: Uuid, entry: CachedTarget, ttl: Duration) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let ttl_secs = ttl.as_secs() as i64;
        let payload = serde_json::to_string(&entry)?;
        let key = Self::target_key(target_id);
        let version_key = Self::version_key(target_id);

        redis::pipe()
            .atomic()
            .hset(&key, "payload", &payload)
            .expire(&key, ttl_secs)
            .set(&version_key, entry.version)
            .expire(&version_key, ttl_secs)
            .sadd(ACTIVE_INDEX_KEY, target_id.to_string())
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_target(&self, target_id: Uuid) -> anyhow::Result<Option<CachedTarget>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.hget(Self::target_key(target_id), "payload").await?;
        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p)?)),
            None => Ok(None),
        }
    }

    async fn delete_target(&self, target_id: Uuid) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .del(Self::target_key(target_id))
            .del(Self::version_key(target_id))
            .srem(ACTIVE_INDEX_KEY, target_id.to_string())
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn all_target_ids(&self) -> anyhow::Result<Vec<Uuid>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(ACTIVE_INDEX_KEY).await?;
        Ok(members.into_iter().filter_map(|m| m.parse().ok()).collect())
    }

    async fn append_delta(
        &self,
        target_id: Uuid,
        event: DeltaEvent,
        max_len: usize,
        ttl: Duration,
    ) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let key = Self::delta_key(target_id);
        let payload = serde_json::to_string(&event)?;
        let _: String = conn
            .xadd_maxlen(
                &key,
                StreamMaxlen::Approx(max_len),
                "*",
                &[("payload", payload)],
            )
            .await?;
        let _: bool = conn.expire(&key, ttl.as_secs() as i64).await?;
        Ok(())
    }

    async fn delta_since(
        &self,
        target_id: Uuid,
        since_version: u64,
        limit: Option<usize>,
    ) -> anyhow::Result<Vec<DeltaEvent>> {
        let mut conn = self.conn.clone();
        let key = Self::delta_key(target_id);
        let reply: StreamRangeReply = conn.xrange_all(&key).await?;
        let mut events = parse_delta_stream(&reply)?
            .into_iter()
            .filter(|e| e.version > since_version)
            .collect::<Vec<_>>();
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
        let mut conn = self.conn.clone();
        let key = Self::delta_key(target_id);
        let reply: StreamRangeReply = conn.xrange_all(&key).await?;
        let events = parse_delta_stream(&reply)?
            .into_iter()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
            .collect();
        Ok(events)
    }
}

fn parse_delta_stream(reply: &StreamRangeReply) -> anyhow::Result<Vec<DeltaEvent>> {
    reply
        .ids
        .iter()
        .filter_map(|id| {
            id.map
                .get("payload")
                .and_then(|v| redis::from_redis_value::<String>(v).ok())
        })
        .map(|payload| serde_json::from_str(&payload).map_err(anyhow::Error::from))
        .collect()
}
