//! The subscription bus: a client registry and bidirectional
//! client↔target subscription graph, with bounded per-client outbound
//! queues. A client whose queue overflows or whose send otherwise fails
//! is disconnected and its subscriptions torn down — there is no
//! guaranteed delivery to a client that can't keep up.

use crate::cache::DeltaEvent;
use crate::formation::Formation;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use serde::Serialize;
use uuid::Uuid;

/// Outbound queue depth per client before a send is treated as a
/// back-pressure failure and the client is dropped.
const CLIENT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    #[serde(rename = "TARGET_UPDATE")]
    TargetUpdate { target_id: Uuid, delta: DeltaEvent, timestamp: DateTime<Utc> },
    #[serde(rename = "FORMATION_DETECTED")]
    FormationDetected { formation: Formation, timestamp: DateTime<Utc> },
    #[serde(rename = "SUBSCRIBE_CONFIRM")]
    SubscribeConfirm { subscribed_targets: Vec<Uuid>, timestamp: DateTime<Utc> },
    #[serde(rename = "INITIAL_STATE")]
    InitialState { targets: Vec<Uuid>, timestamp: DateTime<Utc> },
    #[serde(rename = "PONG")]
    Pong { timestamp: DateTime<Utc> },
    #[serde(rename = "DELTA_RESPONSE")]
    DeltaResponse { events: Vec<DeltaEvent>, timestamp: DateTime<Utc> },
    #[serde(rename = "ERROR")]
    Error { message: String, timestamp: DateTime<Utc> },
}

struct ClientHandle {
    sender: flume::Sender<OutboundMessage>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct BusStats {
    pub connected_clients: usize,
    pub subscribed_targets: usize,
}

/// Holds the connection registry and subscription graph. Cheaply
/// cloneable (an `Arc` internally via `DashMap`'s own sharding plus the
/// handle being small); share one instance across the stream service,
/// recognition loop, and websocket handlers.
#[derive(Default)]
pub struct SubscriptionBus {
    clients: DashMap<String, ClientHandle>,
    client_subscriptions: DashMap<String, DashSet<Uuid>>,
    target_subscriptions: DashMap<Uuid, DashSet<String>>,
}

impl SubscriptionBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new client connection and returns the receiver its
    /// writer task should drain.
    pub fn connect(&self, client_id: impl Into<String>) -> flume::Receiver<OutboundMessage> {
        let client_id = client_id.into();
        let (tx, rx) = flume::bounded(CLIENT_QUEUE_CAPACITY);
        self.clients.insert(client_id.clone(), ClientHandle { sender: tx });
        self.client_subscriptions.insert(client_id, DashSet::new());
        rx
    }

    pub fn disconnect(&self, client_id: &str) {
        if let Some((_, targets)) = self.client_subscriptions.remove(client_id) {
            for target_id in targets.iter() {
                if let Some(subs) = self.target_subscriptions.get(&target_id) {
                    subs.remove(client_id);
                }
            }
        }
        self.clients.remove(client_id);
    }

    pub fn subscribe(&self, client_id: &str, target_ids: &[Uuid]) {
        if !self.clients.contains_key(client_id) {
            return;
        }
        let Some(client_targets) = self.client_subscriptions.get(client_id) else {
            return;
        };
        for &target_id in target_ids {
            client_targets.insert(target_id);
            self.target_subscriptions.entry(target_id).or_default().insert(client_id.to_string());
        }
        self.send(
            client_id,
            OutboundMessage::SubscribeConfirm { subscribed_targets: target_ids.to_vec(), timestamp: Utc::now() },
        );
    }

    pub fn unsubscribe(&self, client_id: &str, target_ids: &[Uuid]) {
        if let Some(client_targets) = self.client_subscriptions.get(client_id) {
            for target_id in target_ids {
                client_targets.remove(target_id);
                if let Some(subs) = self.target_subscriptions.get(target_id) {
                    subs.remove(client_id);
                }
            }
        }
    }

    /// Sends a point-to-point message; on a full queue or closed
    /// receiver, disconnects the client. Returns whether the send
    /// succeeded.
    pub fn send(&self, client_id: &str, message: OutboundMessage) -> bool {
        let Some(handle) = self.clients.get(client_id) else {
            return false;
        };
        match handle.sender.try_send(message) {
            Ok(()) => true,
            Err(_) => {
                drop(handle);
                tracing::warn!(client_id, "send failed, disconnecting client");
                self.disconnect(client_id);
                false
            }
        }
    }

    /// Notifies only the subscribers of `target_id`.
    pub fn notify_target_update(&self, target_id: Uuid, delta: DeltaEvent) {
        let Some(subs) = self.target_subscriptions.get(&target_id) else {
            return;
        };
        let subscribers: Vec<String> = subs.iter().map(|s| s.clone()).collect();
        drop(subs);
        for client_id in subscribers {
            self.send(
                &client_id,
                OutboundMessage::TargetUpdate { target_id, delta: delta.clone(), timestamp: Utc::now() },
            );
        }
    }

    /// Broadcasts to every connected client.
    pub fn broadcast_formation(&self, formation: Formation) {
        let client_ids: Vec<String> = self.clients.iter().map(|e| e.key().clone()).collect();
        for client_id in client_ids {
            self.send(
                &client_id,
                OutboundMessage::FormationDetected { formation: formation.clone(), timestamp: Utc::now() },
            );
        }
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            connected_clients: self.clients.len(),
            subscribed_targets: self.target_subscriptions.len(),
        }
    }
}
