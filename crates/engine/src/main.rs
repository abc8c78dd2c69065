//! Storebridge engine binary.
//!
//! Runs the three long-lived pieces of the sync engine in one process:
//!
//! 1. Startup recovery - stores stuck in `syncing` are forced to `failed`
//!    and stale queue locks are cleared, *before* any worker can claim work.
//! 2. The worker dispatch pool draining the tenant-ordered job queue.
//! 3. The webhook ingress (axum) receiving order webhooks per tenant.
//!
//! Shutdown is graceful: on Ctrl+C/SIGTERM the ingress stops accepting
//! requests, workers finish their in-flight jobs, and the process exits.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;
use std::time::Duration;

use sentry::integrations::tracing as sentry_tracing;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storebridge_engine::config::EngineConfig;
use storebridge_engine::db::{
    self, PgCatalogRepository, PgOrderRepository, PgStoreRepository, StoreRepository,
};
use storebridge_engine::limiter::RequestExecutor;
use storebridge_engine::providers::AdapterRegistry;
use storebridge_engine::queue::{JobQueue, PostgresJobQueue};
use storebridge_engine::state::AppState;
use storebridge_engine::sync::{SyncLifecycle, SyncService};
use storebridge_engine::webhooks;
use storebridge_engine::worker::WorkerPool;

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &EngineConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            sample_rate: config.sentry_sample_rate,
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    // Load configuration from environment (needed for Sentry init)
    let config = EngineConfig::from_env().expect("Failed to load configuration");

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);

    // Initialize tracing with EnvFilter and Sentry integration
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "storebridge_engine=info,tower_http=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    // Database pool and repositories
    let pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");
    tracing::info!("Database pool created");

    // NOTE: Migrations are NOT run automatically on startup.
    // Run them explicitly via: cargo run -p storebridge-cli -- migrate

    let stores: Arc<dyn StoreRepository> = Arc::new(PgStoreRepository::new(pool.clone()));
    let catalog = Arc::new(PgCatalogRepository::new(pool.clone()));
    let orders = Arc::new(PgOrderRepository::new(pool.clone()));
    let queue: Arc<dyn JobQueue> = Arc::new(PostgresJobQueue::new(pool.clone()));

    // Outbound plumbing: one HTTP client, one rate-limited executor shared
    // by all adapters.
    let http = reqwest::Client::builder()
        .timeout(config.limits.http_timeout)
        .build()
        .expect("Failed to create HTTP client");
    let executor = Arc::new(RequestExecutor::new(config.limits.clone()));
    let adapters = AdapterRegistry::standard(&config, http, executor);

    let lifecycle = SyncLifecycle::new(Arc::clone(&stores));
    let service = Arc::new(SyncService::new(
        Arc::clone(&stores),
        catalog,
        orders,
        adapters,
        lifecycle,
    ));

    // Startup recovery MUST complete before the pool starts claiming:
    // a store left in `syncing` by a crash would otherwise race a fresh
    // full-sync job for the same store.
    let repaired = service
        .lifecycle()
        .recover_on_boot()
        .await
        .expect("Startup store recovery failed");
    let released = queue.recover().await.expect("Startup queue recovery failed");
    tracing::info!(
        stores_repaired = repaired,
        jobs_released = released,
        "startup recovery complete"
    );

    // Shutdown plumbing: signal -> token -> ingress + workers.
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.cancel();
        });
    }

    let worker_pool = WorkerPool::new(
        Arc::clone(&queue),
        Arc::clone(&service),
        &config.worker,
        shutdown.clone(),
    );
    let worker_handle = tokio::spawn(worker_pool.run());

    // Webhook ingress
    let state = AppState::new(Arc::clone(&stores), Arc::clone(&service), Some(pool.clone()));
    let app = webhooks::router(state);

    let addr = config.socket_addr();
    tracing::info!("webhook ingress listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await
        .expect("Server error");

    // Let in-flight jobs finish before releasing the pool.
    if let Err(e) = worker_handle.await {
        tracing::error!(error = %e, "worker pool task panicked");
    }
    pool.close().await;
    tracing::info!("shutdown complete");

    // Give Sentry a moment to flush buffered events.
    tokio::time::sleep(Duration::from_millis(100)).await;
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
