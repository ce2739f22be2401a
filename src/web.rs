//! The HTTP/WS surface: `AppState`, request-logging middleware, and the
//! router wiring every handler in `actions/`.

use anyhow::Result;
use axum::{
    Router,
    body::Body,
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use tower_http::cors::CorsLayer;
use tracing::info;

use crate::actions;
use crate::bus::SubscriptionBus;
use crate::cache::TargetCache;
use crate::config::Config;
use crate::recognition::RecognitionEngine;
use crate::store::FormationStore;
use crate::stream::StreamService;
use crate::sync::DeltaSyncService;

/// Shared application state, wired once in `main` and cloned into every
/// request handler via axum's `State` extractor. Cloning is cheap: every
/// field is an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub cache: Arc<TargetCache>,
    pub engine: Arc<RecognitionEngine>,
    pub store: Arc<FormationStore>,
    pub bus: Arc<SubscriptionBus>,
    pub sync: Arc<DeltaSyncService>,
    pub stream: Arc<StreamService>,
}

/// Logs every request with a short correlation id and timing, the way
/// the teacher's request logging middleware does; dropped the Sentry
/// error-capture middleware that accompanied it there since this service
/// carries no Sentry client (see DESIGN.md).
async fn request_logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = Uuid::new_v4().to_string()[..8].to_string();
    let start_time = Instant::now();

    info!("started {} {} [{}]", method, path, request_id);
    let response = next.run(request).await;
    let duration = start_time.elapsed();

    info!(
        "completed {} {} [{}] {} in {:.2}ms",
        method,
        path,
        request_id,
        response.status().as_u16(),
        duration.as_secs_f64() * 1000.0
    );
    response
}

fn router(state: AppState) -> Router {
    let cache_router = Router::new()
        .route("/targets/batch_update", post(actions::batch_update))
        .route("/targets/batch_query", post(actions::batch_query))
        .route("/targets/active", get(actions::active_targets))
        .route("/targets/{id}/delta", get(actions::target_delta))
        .route("/targets/{id}/history", get(actions::target_history))
        .route("/targets/{id}/state", get(actions::target_state))
        .route("/sync/session", post(actions::create_session))
        .route("/sync/pull", post(actions::pull))
        .route("/sync/compare", post(actions::compare))
        .route("/formations/recent", get(actions::recent))
        .route("/formations/range", get(actions::range))
        .route("/formations/date/{date}", get(actions::by_date))
        .route("/formations/{id}", get(actions::by_id))
        .route(
            "/formations/statistics/overview",
            get(actions::statistics_overview),
        )
        .route("/admin/cleanup", post(actions::admin_cleanup))
        .route("/admin/status", get(actions::admin_status))
        .route("/admin/clear", post(actions::admin_clear))
        .route("/health", get(actions::cache_health))
        .route("/ws/{client_id}", get(actions::cache_websocket));

    let stream_router = Router::new()
        .route("/ws/push", get(actions::stream_push_websocket))
        .route("/ws/results", get(actions::stream_results_websocket));

    Router::new()
        .route("/recognize", post(actions::recognize))
        .route("/recognize/incremental", post(actions::recognize_incremental))
        .route("/health", get(actions::health))
        .route("/ws/status", get(actions::ws_status))
        .nest("/cache", cache_router)
        .nest("/stream", stream_router)
        .with_state(state)
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(CorsLayer::permissive())
}

pub async fn start_web_server(bind_addr: &str, state: AppState) -> Result<()> {
    actions::health::init_server_start_time();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("web server listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Background sweep: expired formations are TTL'd by the backend itself,
/// but orphaned index entries and stale daily indexes need an explicit
/// periodic pass. Grounded on `original_source/scheduler/cleanup.py`'s
/// hourly cleanup job (the daily-cron/hourly-cron split doesn't carry
/// over; one interval covers both here).
pub async fn run_cleanup_loop(store: Arc<FormationStore>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match store.cleanup_expired().await {
            Ok(stats) => {
                if stats.orphan_indexes_cleaned > 0 || stats.stale_daily_indexes_removed > 0 {
                    info!(
                        orphans = stats.orphan_indexes_cleaned,
                        stale_daily_indexes = stats.stale_daily_indexes_removed,
                        "formation store cleanup completed"
                    );
                }
            }
            Err(err) => tracing::warn!(error = %err, "formation store cleanup failed"),
        }
    }
}
