//! Delta sync: session-scoped incremental pull, full-sync bootstrap, and
//! client/server state comparison, over the target cache. Grounded on
//! `original_source/sync/delta_sync.py`.

use crate::cache::{DeltaEvent, TargetCache};
use crate::attributes::TargetState;
use crate::errors::ServiceResult;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Trailing delta events kept in a pull response, per target.
const DELTA_TAIL_LEN: usize = 5;

struct SyncSession {
    client_id: String,
    created_at: DateTime<Utc>,
    last_sync_at: DateTime<Utc>,
    /// Empty set means "subscribed to all active targets".
    target_ids: Vec<Uuid>,
    versions: HashMap<Uuid, u64>,
    expires_at: Instant,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetDelta {
    pub current_state: TargetState,
    pub version: u64,
    pub base_version: u64,
    pub delta_events: Vec<DeltaEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemovedTarget {
    pub target_id: Uuid,
    pub last_version: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeltaPackage {
    pub timestamp: DateTime<Utc>,
    pub session_id: Option<String>,
    pub full_sync: bool,
    pub targets: HashMap<Uuid, TargetDelta>,
    pub removed_targets: Vec<RemovedTarget>,
    pub current_versions: HashMap<Uuid, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FullStatePackage {
    pub timestamp: DateTime<Utc>,
    pub targets: HashMap<Uuid, TargetState>,
    pub versions: HashMap<Uuid, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompareResult {
    pub timestamp: DateTime<Utc>,
    pub need_update: Vec<Uuid>,
    pub new_targets: Vec<Uuid>,
    pub server_versions: HashMap<Uuid, u64>,
}

/// Session-scoped incremental sync over a [`TargetCache`]. Sessions live
/// in memory with a TTL; nothing here is durable across a restart, which
/// is fine since a client with a stale or missing session just falls
/// back to `pull_full`.
pub struct DeltaSyncService {
    cache: Arc<TargetCache>,
    sessions: DashMap<String, SyncSession>,
    session_ttl: Duration,
}

impl DeltaSyncService {
    pub fn new(cache: Arc<TargetCache>, session_ttl: Duration) -> Self {
        Self {
            cache,
            sessions: DashMap::new(),
            session_ttl,
        }
    }

    pub fn create_session(&self, client_id: impl Into<String>, target_ids: Option<Vec<Uuid>>) -> String {
        let client_id = client_id.into();
        let session_id = format!("sync_{client_id}_{}", Uuid::new_v4().simple());
        let now = Utc::now();
        self.sessions.insert(
            session_id.clone(),
            SyncSession {
                client_id,
                created_at: now,
                last_sync_at: now,
                target_ids: target_ids.unwrap_or_default(),
                versions: HashMap::new(),
                expires_at: Instant::now() + self.session_ttl,
            },
        );
        session_id
    }

    fn live_session(&self, session_id: &str) -> Option<dashmap::mapref::one::Ref<'_, String, SyncSession>> {
        let entry = self.sessions.get(session_id)?;
        if entry.expires_at <= Instant::now() {
            drop(entry);
            self.sessions.remove(session_id);
            return None;
        }
        Some(entry)
    }

    pub fn close_session(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    /// Returns, per requested target, the current state, version, and up
    /// to the last five delta events since `since_versions[tid]`
    /// (defaulting to 0). Targets absent from the cache but present in
    /// `since_versions` are reported in `removed_targets`. `full_sync` is
    /// true iff the resolved version baseline is empty.
    pub async fn pull(
        &self,
        session_id: Option<&str>,
        target_ids: Option<Vec<Uuid>>,
        since_versions: Option<HashMap<Uuid, u64>>,
    ) -> ServiceResult<DeltaPackage> {
        let session = session_id.and_then(|sid| self.live_session(sid));

        let target_ids = match target_ids {
            Some(ids) => ids,
            None => match &session {
                Some(s) if !s.target_ids.is_empty() => s.target_ids.clone(),
                _ => self.cache.all_active().await?,
            },
        };

        let base_versions = match since_versions {
            Some(v) => v,
            None => session.as_ref().map(|s| s.versions.clone()).unwrap_or_default(),
        };
        drop(session);

        let full_sync = base_versions.is_empty();
        let mut targets = HashMap::new();
        let mut removed_targets = Vec::new();
        let mut current_versions = HashMap::new();

        for target_id in target_ids {
            let current_state = self.cache.get(target_id).await?;
            let current_version = self.cache.version_of(target_id).await?;

            let Some(current_state) = current_state else {
                if let Some(&last_version) = base_versions.get(&target_id) {
                    removed_targets.push(RemovedTarget { target_id, last_version });
                }
                continue;
            };

            current_versions.insert(target_id, current_version);
            let base_version = base_versions.get(&target_id).copied().unwrap_or(0);

            if current_version > base_version {
                let mut delta_events = self.cache.delta_since(target_id, base_version).await?;
                if delta_events.len() > DELTA_TAIL_LEN {
                    let drop_n = delta_events.len() - DELTA_TAIL_LEN;
                    delta_events.drain(0..drop_n);
                }
                targets.insert(
                    target_id,
                    TargetDelta { current_state, version: current_version, base_version, delta_events },
                );
            }
        }

        if let Some(sid) = session_id {
            self.update_session_versions(sid, &current_versions);
        }

        Ok(DeltaPackage {
            timestamp: Utc::now(),
            session_id: session_id.map(str::to_string),
            full_sync,
            targets,
            removed_targets,
            current_versions,
        })
    }

    fn update_session_versions(&self, session_id: &str, versions: &HashMap<Uuid, u64>) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.versions.extend(versions.iter().map(|(&k, &v)| (k, v)));
            session.last_sync_at = Utc::now();
            session.expires_at = Instant::now() + self.session_ttl;
        }
    }

    pub async fn pull_full(&self, target_ids: Option<Vec<Uuid>>) -> ServiceResult<FullStatePackage> {
        let target_ids = match target_ids {
            Some(ids) => ids,
            None => self.cache.all_active().await?,
        };

        let mut targets = HashMap::new();
        let mut versions = HashMap::new();
        for target_id in target_ids {
            if let Some(state) = self.cache.get(target_id).await? {
                let version = self.cache.version_of(target_id).await?;
                targets.insert(target_id, state);
                versions.insert(target_id, version);
            }
        }

        Ok(FullStatePackage { timestamp: Utc::now(), targets, versions })
    }

    /// Compares client-reported versions against the server's and
    /// reports which targets the client should pull, plus targets the
    /// server has that the client never reported.
    pub async fn compare_and_sync(&self, client_versions: &HashMap<Uuid, u64>) -> ServiceResult<CompareResult> {
        let mut need_update = Vec::new();
        let mut server_versions = HashMap::new();

        for (&target_id, &client_version) in client_versions {
            let server_version = self.cache.version_of(target_id).await?;
            server_versions.insert(target_id, server_version);
            if server_version > client_version {
                need_update.push(target_id);
            }
        }

        let all_active: std::collections::HashSet<Uuid> = self.cache.all_active().await?.into_iter().collect();
        let client_has: std::collections::HashSet<Uuid> = client_versions.keys().copied().collect();
        let new_targets = all_active.difference(&client_has).copied().collect();

        Ok(CompareResult { timestamp: Utc::now(), need_update, new_targets, server_versions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPosition;

    fn state() -> TargetState {
        TargetState {
            timestamp: Utc::now(),
            position: GeoPosition::new(116.4, 39.9, 5000.0),
            heading: 90.0,
            speed: 100.0,
            pitch: None,
            roll: None,
        }
    }

    fn service() -> DeltaSyncService {
        let cache = Arc::new(TargetCache::new(
            Arc::new(crate::cache::memory::MemoryBackend::new()),
            Duration::from_secs(60),
            Duration::from_secs(60),
            100,
        ));
        DeltaSyncService::new(cache, Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn pull_full_then_pull_with_returned_versions_is_empty() {
        let svc = service();
        let id = Uuid::new_v4();
        svc.cache.put(id, state()).await.unwrap();

        let full = svc.pull_full(None).await.unwrap();
        assert_eq!(full.versions.len(), 1);

        let second = svc.pull(None, None, Some(full.versions.clone())).await.unwrap();
        assert!(second.targets.is_empty());
        assert!(!second.full_sync);
    }

    #[tokio::test]
    async fn pull_with_no_baseline_is_full_sync_and_includes_target() {
        let svc = service();
        let id = Uuid::new_v4();
        svc.cache.put(id, state()).await.unwrap();

        let resp = svc.pull(None, None, None).await.unwrap();
        assert!(resp.full_sync);
        assert!(resp.targets.contains_key(&id));
    }

    #[tokio::test]
    async fn deleted_target_reported_as_removed() {
        let svc = service();
        let id = Uuid::new_v4();
        svc.cache.put(id, state()).await.unwrap();
        let full = svc.pull_full(None).await.unwrap();
        svc.cache.delete(id, "test").await.unwrap();

        let resp = svc.pull(None, Some(vec![id]), Some(full.versions)).await.unwrap();
        assert_eq!(resp.removed_targets.len(), 1);
        assert_eq!(resp.removed_targets[0].target_id, id);
    }

    #[tokio::test]
    async fn session_scoped_pull_refreshes_stored_versions() {
        let svc = service();
        let id = Uuid::new_v4();
        svc.cache.put(id, state()).await.unwrap();
        let session_id = svc.create_session("client-a", None);

        let first = svc.pull(Some(&session_id), None, None).await.unwrap();
        assert!(first.full_sync);

        let second = svc.pull(Some(&session_id), None, None).await.unwrap();
        assert!(second.targets.is_empty());
    }

    #[tokio::test]
    async fn compare_and_sync_flags_stale_client_version() {
        let svc = service();
        let id = Uuid::new_v4();
        svc.cache.put(id, state()).await.unwrap();
        let current = svc.cache.version_of(id).await.unwrap();

        let mut client_versions = HashMap::new();
        client_versions.insert(id, current - 1);
        let result = svc.compare_and_sync(&client_versions).await.unwrap();
        assert_eq!(result.need_update, vec![id]);
    }
}
