/// Server setup and initialization
///
/// Wires together all components: database, workflow storage, execution
/// engine, scheduler and HTTP routes. Provides the application factory used by
/// the binary and by the integration tests.

use crate::{
    api::{create_api_routes, AppState},
    config::Config,
    database,
    runtime::{
        engine::WorkflowEngine,
        executor::TaskExecutor,
        history::ExecutionHistory,
        scheduler::{CronSchedulerService, WorkflowScheduler},
    },
    workflow::storage::WorkflowStorage,
};
use anyhow::Result;
use axum::{routing::get, Router};
use sqlx::sqlite::SqlitePool;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

/// Build the shared application state on top of an open pool
///
/// Nothing is started here: no recovery pass and no scheduler jobs.
pub async fn build_state(config: &Config, pool: SqlitePool) -> Result<AppState> {
    tracing::info!("📋 Initializing workflow storage");
    let storage = WorkflowStorage::new(pool.clone());
    let history = ExecutionHistory::new(pool);

    tracing::info!("⚙️ Initializing task executor");
    let executor = TaskExecutor::new(Duration::from_secs(config.engine.http_timeout_secs))?;

    tracing::info!(
        "🚀 Initializing execution engine (max {} concurrent executions)",
        config.engine.max_concurrent_executions
    );
    let engine = Arc::new(WorkflowEngine::new(
        storage.clone(),
        history,
        executor,
        config.engine.clone(),
    ));

    tracing::info!("⏰ Initializing scheduler service");
    let scheduler = CronSchedulerService::new(storage.clone(), Arc::clone(&engine))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize scheduler: {}", e))?;

    Ok(AppState {
        storage,
        engine,
        scheduler: Arc::new(scheduler),
    })
}

/// Create the router for a prepared state
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check endpoint
        .route("/healthz", get(health_check))
        .merge(create_api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn initialize(config: &Config) -> Result<(Router, AppState)> {
    let pool = database::connect(&config.database).await?;
    let state = build_state(config, pool).await?;

    state.engine.recover_interrupted().await?;

    if config.scheduler.enabled {
        tracing::info!("🚀 Starting scheduler");
        state
            .scheduler
            .start()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to start scheduler: {}", e))?;
    } else {
        tracing::info!("⏸️ Scheduler disabled by configuration");
    }

    tracing::info!("✅ Application initialized successfully");
    Ok((create_router(state.clone()), state))
}

/// Create the main Axum application with all routes and middleware
///
/// Opens the database, fails executions interrupted by a previous shutdown
/// and starts the scheduler when enabled.
pub async fn create_app(config: Config) -> Result<Router> {
    let (app, _state) = initialize(&config).await?;
    Ok(app)
}

/// Start the HTTP server with the given configuration
///
/// Runs until Ctrl-C, then stops the scheduler before returning.
pub async fn start_server(config: Config) -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,gridflow=debug")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting gridflow server...");

    let (app, state) = initialize(&config).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("🛑 Shutdown signal received");
        })
        .await?;

    if let Err(e) = state.scheduler.shutdown().await {
        tracing::warn!("⚠️ Scheduler shutdown failed: {}", e);
    }

    Ok(())
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
