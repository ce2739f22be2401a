//! `GET /health` and `GET /ws/status`.

use crate::web::AppState;
use axum::Json;
use axum::extract::State;
use serde::Serialize;
use std::sync::OnceLock;
use std::time::Instant;

static SERVER_START_TIME: OnceLock<Instant> = OnceLock::new();

pub fn init_server_start_time() {
    let _ = SERVER_START_TIME.set(Instant::now());
}

fn uptime_seconds() -> u64 {
    SERVER_START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: uptime_seconds(),
    })
}

#[derive(Debug, Serialize)]
pub struct WsStatusResponse {
    pub connected_clients: usize,
    pub subscribed_targets: usize,
}

pub async fn ws_status(State(state): State<AppState>) -> Json<WsStatusResponse> {
    let stats = state.bus.stats();
    Json(WsStatusResponse {
        connected_clients: stats.connected_clients,
        subscribed_targets: stats.subscribed_targets,
    })
}
