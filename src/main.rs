//! FetchForge - a Redis-coordinated distributed Kafka fetch consumer
//!
//! This binary claims work units from a Redis-backed reliable queue, fetches
//! the requested offset windows directly from the named brokers, and settles
//! each unit with its outcome while serving health endpoints.

use std::sync::Arc;

use fetchforge::api::{self, HealthState};
use fetchforge::queue::UnitQueue;
use fetchforge::{consumer, logging, Config, RedisWorkQueue, Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Load and validate configuration from environment
    let config = Arc::new(Config::from_env()?);
    config.validate()?;

    // Initialize logging/tracing
    logging::init_tracing(&config.server.log_level, &config.server.environment)?;

    // Log configuration (with sensitive data masked)
    config.log_config();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting FetchForge");

    // Connect the work queue
    let queue: Arc<dyn UnitQueue> = Arc::new(
        RedisWorkQueue::connect(&config.redis, config.queues.clone()).await?,
    );

    // Start the consumer engine
    let mut handle = consumer::start(Arc::clone(&config), Arc::clone(&queue)).await?;
    let stats = handle.stats();

    // Drain the downstream channel. Deployments embedding the crate attach
    // their own sink here; the standalone binary just accounts for batches.
    if let Some(mut messages) = handle.take_messages() {
        tokio::spawn(async move {
            while let Some(batch) = messages.recv().await {
                tracing::debug!(messages = batch.len(), "Delivered message batch");
            }
        });
    }

    // Serve health endpoints until a shutdown signal arrives
    let state = Arc::new(HealthState::new(Arc::clone(&queue), stats));
    api::server::create_server(Arc::clone(&config), state).await?;

    // Stop the consumer: grace period for the pool, then force
    handle.shutdown().await;

    tracing::info!("FetchForge shutdown complete");
    Ok(())
}
