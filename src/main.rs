//! Application entry point.

use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use transfer_engine::api::create_router;
use transfer_engine::app::{
    AppState, CleanupSchedulerConfig, ProcessingConfig, spawn_cleanup_scheduler,
};
use transfer_engine::domain::ConfigError;
use transfer_engine::infra::{
    InProcessJobQueue, PostgresClient, PostgresConfig, SystemClock, ThreadRandom, WorkerConfig,
    spawn_workers,
};

/// Application configuration
struct Config {
    database_url: String,
    host: String,
    port: u16,
    /// Required on every non-health route; all such requests are refused when unset
    api_key: Option<String>,
    enable_background_worker: bool,
    worker_config: WorkerConfig,
    processing: ProcessingConfig,
    enable_scheduled_cleanup: bool,
    cleanup: CleanupSchedulerConfig,
    db_max_connections: u32,
    /// How long in-flight processing may run on after a shutdown signal
    shutdown_grace: Duration,
}

impl Config {
    fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::Missing("DATABASE_URL".to_string()))?;
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = parse_or("PORT", 3000)?;
        let api_key = env::var("API_KEY").ok().filter(|k| !k.is_empty());

        let enable_background_worker = flag("ENABLE_BACKGROUND_WORKER", true);
        let worker_config = WorkerConfig {
            concurrency: parse_or("WORKER_CONCURRENCY", WorkerConfig::default().concurrency)?,
        };

        let success_rate: f64 = parse_or("PROCESSING_SUCCESS_RATE", ProcessingConfig::default().success_rate)?;
        if !(0.0..=1.0).contains(&success_rate) {
            return Err(ConfigError::Invalid {
                key: "PROCESSING_SUCCESS_RATE".to_string(),
                message: "must be between 0 and 1".to_string(),
            }
            .into());
        }
        let min_delay_ms: u64 = parse_or("PROCESSING_MIN_DELAY_MS", 1000)?;
        let max_delay_ms: u64 = parse_or("PROCESSING_MAX_DELAY_MS", 5000)?;
        let processing = ProcessingConfig {
            success_rate,
            min_delay: Duration::from_millis(min_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms.max(min_delay_ms)),
        };

        let enable_scheduled_cleanup = flag("ENABLE_SCHEDULED_CLEANUP", false);
        let cleanup = CleanupSchedulerConfig {
            interval: Duration::from_secs(parse_or("CLEANUP_INTERVAL_SECS", 86_400u64)?.max(1)),
            keep_last_n: parse_or("CLEANUP_KEEP_LAST_N", 10)?,
            filters: None,
        };

        let db_max_connections = parse_or("DB_MAX_CONNECTIONS", PostgresConfig::default().max_connections)?;
        let shutdown_grace = Duration::from_secs(parse_or("SHUTDOWN_GRACE_SECS", 10u64)?);

        Ok(Self {
            database_url,
            host,
            port,
            api_key,
            enable_background_worker,
            worker_config,
            processing,
            enable_scheduled_cleanup,
            cleanup,
            db_max_connections,
            shutdown_grace,
        })
    }
}

fn flag(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

/// Parse an optional variable; present but malformed values are an error
fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key: key.to_string(),
            message: e.to_string(),
        }),
        _ => Ok(default),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    info!("Transfer engine v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    info!("Initializing infrastructure...");

    let db_config = PostgresConfig {
        max_connections: config.db_max_connections,
        ..PostgresConfig::default()
    };
    let postgres_client = Arc::new(PostgresClient::new(&config.database_url, db_config).await?);
    postgres_client
        .run_migrations()
        .await
        .context("Failed to apply database migrations")?;
    info!("   Database connected and migrations applied");

    let queue = InProcessJobQueue::new();

    let mut app_state = AppState::with_runtime(
        postgres_client.clone(),
        postgres_client,
        Arc::new(queue.clone()),
        Arc::new(SystemClock),
        Arc::new(ThreadRandom),
        config.processing,
    );
    info!(
        success_rate = config.processing.success_rate,
        min_delay = ?config.processing.min_delay,
        max_delay = ?config.processing.max_delay,
        "   Transfer processing configured"
    );

    match config.api_key.clone() {
        Some(key) => {
            app_state = app_state.with_api_key(key);
            info!("   API key authentication enabled");
        }
        None => warn!("   API_KEY not set: all transfer and admin routes will be refused"),
    }

    let app_state = Arc::new(app_state);

    let workers = if config.enable_background_worker {
        let (handles, shutdown_tx) = spawn_workers(queue.clone(), config.worker_config.clone());
        info!(concurrency = config.worker_config.concurrency, "   Queue workers started");
        Some((handles, shutdown_tx))
    } else {
        info!("   Queue workers disabled; jobs will wait in the queue");
        None
    };

    let scheduler = if config.enable_scheduled_cleanup {
        let (handle, shutdown_tx) =
            spawn_cleanup_scheduler(Arc::clone(&app_state.cleanup), config.cleanup.clone());
        info!(interval = ?config.cleanup.interval, "   Scheduled cleanup enabled");
        Some((handle, shutdown_tx))
    } else {
        info!("   Scheduled cleanup disabled");
        None
    };

    let service = Arc::clone(&app_state.service);
    let router = create_router(app_state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Server starting on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop producing before draining consumers
    queue.close();
    if let Some((handle, tx)) = scheduler {
        let _ = tx.send(true);
        let _ = handle.await;
    }
    if let Some((handles, tx)) = workers {
        let _ = tx.send(true);
        for handle in handles {
            let _ = handle.await;
        }
    }
    if !service.executor().drain(config.shutdown_grace).await {
        warn!("Interrupted transfers were marked FAILED");
    }

    info!("Server shutdown complete");
    Ok(())
}
