//! The stream service: absorbs an unbounded stream of incoming target
//! records, writes them through the cache, publishes deltas to the
//! subscription bus, and drives a background recognition tick.
//! Grounded on `original_source/formation_service.py`'s `recognize()`
//! orchestration for the push/tick wiring, and on `stream_manager.rs`'s
//! spawned-task-plus-`CancellationToken` shutdown idiom for the loop.

use crate::attributes::{TargetAttributes, TargetState};
use crate::bus::SubscriptionBus;
use crate::cache::{PutOutcome, TargetCache};
use crate::errors::ServiceResult;
use crate::recognition::RecognitionEngine;
use crate::store::FormationStore;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct PushAck {
    pub received: usize,
    pub changed: usize,
    pub buffer_size: usize,
}

/// A single incoming record from a producer.
pub struct InboundTarget {
    pub target_id: Uuid,
    pub state: TargetState,
    pub attributes: Option<TargetAttributes>,
}

pub struct StreamService {
    cache: Arc<TargetCache>,
    engine: Arc<RecognitionEngine>,
    store: Arc<FormationStore>,
    bus: Arc<SubscriptionBus>,
    recognize_interval: Duration,
}

impl StreamService {
    pub fn new(
        cache: Arc<TargetCache>,
        engine: Arc<RecognitionEngine>,
        store: Arc<FormationStore>,
        bus: Arc<SubscriptionBus>,
        recognize_interval: Duration,
    ) -> Self {
        Self { cache, engine, store, bus, recognize_interval }
    }

    /// Ingests a batch of records: writes each through the cache,
    /// publishes its delta to subscribers, and feeds the recognition
    /// engine's pending set. Always acknowledges — failures on an
    /// individual record are logged and otherwise swallowed, matching the
    /// "producers always receive acknowledgement" contract.
    pub async fn push(&self, records: Vec<InboundTarget>) -> ServiceResult<PushAck> {
        let received = records.len();
        let mut changed = 0usize;

        for record in records {
            let InboundTarget { target_id, state, attributes } = record;
            let result = match self.cache.put(target_id, state.clone()).await {
                Ok(r) => r,
                Err(err) => {
                    tracing::warn!(target = %target_id, error = %err, "cache put failed during push");
                    continue;
                }
            };

            let attributes = attributes.unwrap_or_default();
            self.engine.ingest(target_id, state, attributes);

            if matches!(result.outcome, PutOutcome::Updated) {
                changed += 1;
            }
            if let Some(delta) = result.delta {
                self.bus.notify_target_update(target_id, delta);
            }
        }

        if self.engine.wants_immediate_trigger(changed, received) {
            self.try_run(false).await;
        }

        Ok(PushAck { received, changed, buffer_size: self.engine.pending_len() })
    }

    /// Runs recognition if `should_run` allows it (or unconditionally
    /// when `forced`), stores any resulting formations, and broadcasts
    /// them. On failure the pending set is restored so the next tick
    /// retries; the error never reaches the caller.
    async fn try_run(&self, forced: bool) {
        if !forced && !self.engine.should_run(false) {
            return;
        }

        let active_ids = match self.cache.all_active().await {
            Ok(ids) => ids,
            Err(err) => {
                tracing::warn!(error = %err, "failed to list active targets, skipping recognition tick");
                return;
            }
        };
        let batch = match self.cache.get_batch(&active_ids).await {
            Ok(batch) => batch,
            Err(err) => {
                tracing::warn!(error = %err, "failed to fetch active target states, skipping recognition tick");
                return;
            }
        };
        let recent = crate::cache::CacheSnapshot(batch);

        if let Some(formations) = self.engine.run(forced, Some(&recent)).await {
            for formation in formations {
                match self.store.store(&formation).await {
                    Ok(_) => self.bus.broadcast_formation(formation),
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to persist formation, broadcasting anyway");
                        self.bus.broadcast_formation(formation);
                    }
                }
            }
        }
    }

    /// The background tick: every `recognize_interval`, attempts a run.
    /// `should_run` internally enforces MIN_INTERVAL and the
    /// pending-non-empty condition, so most ticks with nothing new are
    /// cheap no-ops.
    pub async fn run_tick_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.recognize_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("stream service tick loop shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    self.try_run(false).await;
                }
            }
        }
    }
}
