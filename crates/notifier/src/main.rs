use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use herald_common::config::AppConfig;
use herald_common::db;
use herald_engine::dispatch::WorkerPool;
use herald_engine::orchestrator::{Orchestrator, RoutingDefaults};
use herald_engine::repository::{DeliveryRepository, PgDeliveryRepository};
use herald_notifier::{build_capabilities, build_queue};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "herald_engine=info,herald_notifier=info".into()),
        )
        .json()
        .init();

    tracing::info!("Herald notifier starting...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Connect to database
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::run_migrations(&pool).await?;

    let repository: Arc<dyn DeliveryRepository> = Arc::new(PgDeliveryRepository::new(pool));
    let capabilities = build_capabilities(&config)?;
    let orchestrator = Arc::new(
        Orchestrator::new(
            repository.clone(),
            capabilities,
            RoutingDefaults::from_config(&config),
        )
        .with_claim_lease(Duration::from_secs(config.dispatch_claim_lease_secs)),
    );

    let queue = build_queue(&config).await?;
    let workers = WorkerPool::new(queue, orchestrator, config.dispatch_workers);

    if config.dispatch_recover_on_start {
        workers.recover(repository.as_ref()).await?;
    }

    // Stop taking new triggers on Ctrl+C, then drain in-flight work
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal, draining workers...");
            let _ = shutdown_tx.send(true);
        }
    });

    workers.run(shutdown_rx).await?;

    tracing::info!("Herald notifier stopped.");
    Ok(())
}
