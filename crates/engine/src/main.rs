use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use apiforge_engine::config::Config;
use apiforge_engine::jobs::{PoolMetricsTask, RetrySweepTask, TaskScheduler, TokenPurgeTask};
use apiforge_engine::logging;
use apiforge_engine::services::{
    BulkExecutionService, HttpDispatcher, JobEngine, TokenCache,
};
use persistence::repositories::{
    BulkExecutionRepository, BulkRowRepository, JobExecutionRepository, ProjectRepository,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    logging::init_logging(&config.logging);

    info!("Starting Apiforge worker v{}", env!("CARGO_PKG_VERSION"));

    // Create database pool
    let pool = persistence::db::create_pool(&config.database).await?;

    // Run migrations
    info!("Running database migrations...");
    sqlx::migrate!("../persistence/src/migrations")
        .run(&pool)
        .await?;
    info!("Migrations completed");

    // Wire up services
    let token_cache = Arc::new(TokenCache::new(Duration::from_secs(
        config.auth.token_ttl_secs,
    )));
    let dispatcher = Arc::new(HttpDispatcher::new(&config.http, Arc::clone(&token_cache))?);

    let bulk_service = Arc::new(BulkExecutionService::new(
        ProjectRepository::new(pool.clone()),
        BulkExecutionRepository::new(pool.clone()),
        BulkRowRepository::new(pool.clone()),
        JobExecutionRepository::new(pool.clone()),
        Arc::clone(&dispatcher),
    ));

    let mut engine = JobEngine::new(
        JobExecutionRepository::new(pool.clone()),
        config.worker.max_concurrent_jobs,
    );
    engine.register(bulk_service);
    let engine = Arc::new(engine);

    // Background tasks
    let mut scheduler = TaskScheduler::new();
    scheduler.register(RetrySweepTask::new(
        Arc::clone(&engine),
        config.worker.retry_poll_secs,
        config.worker.retry_batch_size,
        config.worker.stale_job_minutes,
    ));
    scheduler.register(PoolMetricsTask::new(pool.clone()));
    scheduler.register(TokenPurgeTask::new(Arc::clone(&token_cache)));
    scheduler.start();

    info!("Worker running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received");
    scheduler.shutdown();
    scheduler.wait_for_shutdown(Duration::from_secs(30)).await;

    Ok(())
}
