//! Herald API server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use herald_common::config::AppConfig;
use herald_common::db::{create_pool, run_migrations};
use herald_engine::dispatch::{DispatchTrigger, WorkerPool};
use herald_engine::orchestrator::{Orchestrator, RoutingDefaults};
use herald_engine::repository::{DeliveryRepository, PgDeliveryRepository};
use herald_notifier::{build_capabilities, build_queue};

use herald_api::routes::create_router;
use herald_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("herald_api=debug,herald_engine=debug,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting Herald API server...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Create database connection pool
    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    run_migrations(&pool).await?;
    let repository: Arc<dyn DeliveryRepository> = Arc::new(PgDeliveryRepository::new(pool));

    let queue = build_queue(&config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Without Redis nobody else can see the queue, so consume it here
    let workers = if config.redis_url.is_none() {
        let orchestrator = Arc::new(
            Orchestrator::new(
                repository.clone(),
                build_capabilities(&config)?,
                RoutingDefaults::from_config(&config),
            )
            .with_claim_lease(Duration::from_secs(config.dispatch_claim_lease_secs)),
        );
        let pool = WorkerPool::new(queue.clone(), orchestrator, config.dispatch_workers);
        if config.dispatch_recover_on_start {
            pool.recover(repository.as_ref()).await?;
        }
        Some(tokio::spawn(async move { pool.run(shutdown_rx).await }))
    } else {
        None
    };

    // Build application state
    let state = AppState::new(repository, DispatchTrigger::new(queue));

    // Build router
    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Received shutdown signal, stopping gracefully...");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(workers) = workers {
        workers.await??;
    }

    Ok(())
}
