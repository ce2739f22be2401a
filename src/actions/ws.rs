//! `/cache/ws/{client_id}`: subscribe/unsubscribe/ping/pull surface over
//! the subscription bus. Grounded on `actions/fixes.rs`'s split-socket,
//! three-task shape, adapted from its NATS-backed device/area
//! subscriptions to the bus's target-id subscriptions.
//!
//! `/stream/ws/push` and `/stream/ws/results` are the two narrower
//! streaming surfaces named alongside it: a write-only ingest socket and
//! a read-only results firehose. `original_source/api_stream.py` names
//! both but was filtered down to an empty router stub, so their shape
//! here is inferred from `stream_service.py`'s `push_data`/formation
//! broadcast and `websocket_manager.py`, not ported line for line.

use crate::attributes::{TargetAttributes, TargetState};
use crate::bus::OutboundMessage;
use crate::cache::DeltaEvent;
use crate::stream::InboundTarget;
use crate::web::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum InboundMessage {
    #[serde(rename = "SUBSCRIBE")]
    Subscribe { target_ids: Vec<Uuid> },
    #[serde(rename = "UNSUBSCRIBE")]
    Unsubscribe { target_ids: Vec<Uuid> },
    #[serde(rename = "PING")]
    Ping,
    #[serde(rename = "GET_DELTA")]
    GetDelta { target_id: Uuid, since_version: u64 },
    #[serde(rename = "GET_LATEST")]
    GetLatest { target_ids: Vec<Uuid> },
}

pub async fn cache_websocket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| handle_websocket(socket, state, client_id))
}

async fn handle_websocket(socket: WebSocket, state: AppState, client_id: String) {
    info!(client_id, "new cache websocket connection");
    metrics::counter!("websocket_connections").increment(1);

    let outbound_rx = state.bus.connect(client_id.clone());
    let (sender, receiver) = socket.split();

    let write_task = tokio::spawn(handle_write(sender, outbound_rx));
    let read_task = tokio::spawn(handle_read(receiver, state.clone(), client_id.clone()));

    tokio::select! {
        _ = write_task => info!(client_id, "websocket write task completed"),
        _ = read_task => info!(client_id, "websocket read task completed"),
    }

    state.bus.disconnect(&client_id);
    info!(client_id, "cache websocket connection terminated");
}

async fn handle_write(
    mut sender: futures_util::stream::SplitSink<WebSocket, Message>,
    outbound_rx: flume::Receiver<OutboundMessage>,
) {
    while let Ok(message) = outbound_rx.recv_async().await {
        let depth = outbound_rx.len();
        metrics::gauge!("websocket_queue_depth").set(depth as f64);

        let json = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(err) => {
                warn!(error = %err, "failed to serialize outbound websocket message");
                continue;
            }
        };
        if sender.send(Message::Text(json.into())).await.is_err() {
            break;
        }
    }
}

async fn handle_read(
    mut receiver: futures_util::stream::SplitStream<WebSocket>,
    state: AppState,
    client_id: String,
) {
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<InboundMessage>(&text) {
                Ok(inbound) => dispatch(&state, &client_id, inbound).await,
                Err(err) => warn!(client_id, error = %err, "failed to parse inbound websocket message"),
            },
            Ok(Message::Close(_)) => {
                info!(client_id, "websocket closed by client");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(client_id, error = %err, "websocket read error");
                break;
            }
        }
    }
}

async fn dispatch(state: &AppState, client_id: &str, message: InboundMessage) {
    match message {
        InboundMessage::Subscribe { target_ids } => {
            state.bus.subscribe(client_id, &target_ids);
        }
        InboundMessage::Unsubscribe { target_ids } => {
            state.bus.unsubscribe(client_id, &target_ids);
        }
        InboundMessage::Ping => {
            state.bus.send(client_id, OutboundMessage::Pong { timestamp: Utc::now() });
        }
        InboundMessage::GetDelta { target_id, since_version } => {
            let events: Vec<DeltaEvent> =
                state.cache.delta_since(target_id, since_version).await.unwrap_or_default();
            state.bus.send(client_id, OutboundMessage::DeltaResponse { events, timestamp: Utc::now() });
        }
        InboundMessage::GetLatest { target_ids } => {
            state.bus.send(
                client_id,
                OutboundMessage::InitialState { targets: target_ids, timestamp: Utc::now() },
            );
        }
    }
}

#[derive(Debug, Deserialize)]
struct PushFrame {
    targets: Vec<PushFrameTarget>,
}

#[derive(Debug, Deserialize)]
struct PushFrameTarget {
    target_id: Uuid,
    state: TargetState,
    #[serde(default)]
    attributes: Option<TargetAttributes>,
}

/// Write-only ingest socket: each inbound frame is a batch push,
/// acknowledged the same way `POST /cache/targets/batch_update` is.
pub async fn stream_push_websocket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_stream_push(socket, state))
}

async fn handle_stream_push(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    while let Some(msg) = receiver.next().await {
        let frame = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                warn!(error = %err, "stream push websocket read error");
                break;
            }
        };

        let parsed = match serde_json::from_str::<PushFrame>(&frame) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(error = %err, "failed to parse stream push frame");
                continue;
            }
        };
        let records: Vec<InboundTarget> = parsed
            .targets
            .into_iter()
            .map(|t| InboundTarget { target_id: t.target_id, state: t.state, attributes: t.attributes })
            .collect();

        let ack = match state.stream.push(records).await {
            Ok(ack) => ack,
            Err(err) => {
                warn!(error = %err, "stream push failed");
                continue;
            }
        };
        if let Ok(json) = serde_json::to_string(&ack)
            && sender.send(Message::Text(json.into())).await.is_err()
        {
            break;
        }
    }
}

/// Read-only results firehose: connects to the subscription bus without
/// ever subscribing to a target, so it only ever receives
/// `FORMATION_DETECTED` broadcasts (which go to every connected client,
/// not just subscribers — see `SubscriptionBus::broadcast_formation`).
pub async fn stream_results_websocket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_stream_results(socket, state))
}

async fn handle_stream_results(socket: WebSocket, state: AppState) {
    let client_id = format!("results-{}", Uuid::new_v4());
    info!(client_id, "new stream results connection");

    let outbound_rx = state.bus.connect(client_id.clone());
    let (sender, mut receiver) = socket.split();
    let write_task = tokio::spawn(handle_write(sender, outbound_rx));

    while let Some(msg) = receiver.next().await {
        if matches!(msg, Ok(Message::Close(_)) | Err(_)) {
            break;
        }
    }

    write_task.abort();
    state.bus.disconnect(&client_id);
    info!(client_id, "stream results connection terminated");
}
