use clap::{Parser, Subcommand};
use formation_recognition::bus::SubscriptionBus;
use formation_recognition::cache::memory::MemoryBackend;
use formation_recognition::cache::redis_backend::RedisBackend;
use formation_recognition::cache::TargetCache;
use formation_recognition::config::Config;
use formation_recognition::metrics::{
    initialize_recognition_metrics, initialize_stream_metrics, start_metrics_server,
};
use formation_recognition::recognition::RecognitionEngine;
use formation_recognition::rules::{RuleEngine, presets};
use formation_recognition::store::memory::MemoryFormationBackend;
use formation_recognition::store::redis_backend::RedisFormationBackend;
use formation_recognition::store::FormationStore;
use formation_recognition::stream::StreamService;
use formation_recognition::sync::DeltaSyncService;
use formation_recognition::web::{self, AppState};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Formation recognition service: ingests target track updates, detects
/// formation flying, and serves the result over HTTP and websockets.
#[derive(Debug, Parser)]
#[command(name = "formation-recognition", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Runs the full service: ingestion, recognition tick, HTTP/WS surface,
    /// and metrics server. The default when no subcommand is given.
    Serve {
        /// Recognition rule preset applied at startup.
        #[arg(long, default_value = "tight_fighter")]
        preset: String,
    },
    /// Runs a single expired-formation cleanup pass against the configured
    /// store and exits, rather than holding the sweep open as a background
    /// loop. Useful for driving cleanup from an external scheduler instead.
    CleanupOnce,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .event_format(formation_recognition::log_format::TargetFirstFormat)
        .init();
}

async fn build_store(config: &Config) -> anyhow::Result<Arc<FormationStore>> {
    Ok(Arc::new(match &config.redis_url {
        Some(url) => FormationStore::new(
            Arc::new(RedisFormationBackend::connect(url).await?),
            config.formation_ttl,
        ),
        None => FormationStore::new(Arc::new(MemoryFormationBackend::new()), config.formation_ttl),
    }))
}

async fn run_cleanup_once(config: &Config) -> anyhow::Result<()> {
    let store = build_store(config).await?;
    let stats = store.cleanup_expired().await?;
    info!(
        orphans = stats.orphan_indexes_cleaned,
        stale_daily_indexes = stats.stale_daily_indexes_removed,
        "one-shot formation store cleanup completed"
    );
    Ok(())
}

async fn run_serve(config: Arc<Config>, preset: &str) -> anyhow::Result<()> {
    let rules = presets::by_name(preset).unwrap_or_else(|| panic!("unknown recognition preset: {preset}"));

    let cache = Arc::new(match &config.redis_url {
        Some(url) => {
            info!("connecting target cache to redis at {}", url);
            TargetCache::new(
                Arc::new(RedisBackend::connect(url).await?),
                config.target_ttl,
                config.delta_ttl,
                config.delta_max_per_target,
            )
        }
        None => {
            info!("target cache running in-memory, set REDIS_URL to persist across restarts");
            TargetCache::new(
                Arc::new(MemoryBackend::new()),
                config.target_ttl,
                config.delta_ttl,
                config.delta_max_per_target,
            )
        }
    });

    let store = build_store(&config).await?;

    let engine = Arc::new(RecognitionEngine::new(&config, RuleEngine::with_rules(rules)));

    let bus = Arc::new(SubscriptionBus::new());
    let sync = Arc::new(DeltaSyncService::new(cache.clone(), config.session_ttl));
    let stream = Arc::new(StreamService::new(
        cache.clone(),
        engine.clone(),
        store.clone(),
        bus.clone(),
        config.recognize_interval,
    ));

    initialize_stream_metrics();
    initialize_recognition_metrics();

    let cancel = CancellationToken::new();
    let tick_handle = tokio::spawn(stream.clone().run_tick_loop(cancel.clone()));
    let cleanup_handle =
        tokio::spawn(web::run_cleanup_loop(store.clone(), std::time::Duration::from_secs(3_600)));
    let metrics_handle = tokio::spawn(start_metrics_server(config.metrics_port));

    let app_state = AppState { config: config.clone(), cache, engine, store, bus, sync, stream };

    let shutdown = tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        cancel.cancel();
    });

    tokio::select! {
        result = web::start_web_server(&config.bind_addr, app_state) => {
            result?;
        }
        _ = shutdown => {}
    }

    tick_handle.abort();
    cleanup_handle.abort();
    metrics_handle.abort();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = Arc::new(Config::from_env());

    match cli.command.unwrap_or(Commands::Serve { preset: "tight_fighter".to_string() }) {
        Commands::Serve { preset } => run_serve(config, &preset).await,
        Commands::CleanupOnce => run_cleanup_once(&config).await,
    }
}
