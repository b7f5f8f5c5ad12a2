//! Startup wiring: blob store, then message channel, then the consumer.

use anyhow::{Context, Result};
use std::sync::Arc;
use tarpaulin_core::Config;
use tarpaulin_infra::{connect_pool, run_migrations};
use tarpaulin_queue::{
    connect_with_retry, create_channel, Consumer, ConsumerConfig, QueueError, RetryPolicy,
};
use tarpaulin_storage::create_blob_store;

use crate::pipeline::{ResizeWorker, WorkerSettings};

/// Build a consumer ready to run.
///
/// Connections that are refused are retried according to the configured
/// [`RetryPolicy`]; other startup failures are returned.
pub async fn build_consumer(config: &Config) -> Result<Consumer> {
    let policy = RetryPolicy::from_config(config);

    let pool = if config.requires_database() {
        let pool = connect_with_retry(&policy, || async {
            connect_pool(config).await.map_err(QueueError::from)
        })
        .await
        .context("Failed to connect to database")?;
        run_migrations(&pool).await?;
        Some(pool)
    } else {
        None
    };

    let store = create_blob_store(config, pool.clone())
        .await
        .context("Failed to initialize blob store")?;

    let channel = create_channel(config, pool).context("Failed to initialize message channel")?;
    for queue in [config.image_queue(), config.dead_letter_queue()] {
        connect_with_retry(&policy, || channel.connect(queue))
            .await
            .with_context(|| format!("Failed to declare queue {}", queue))?;
    }

    let worker = Arc::new(ResizeWorker::new(store, WorkerSettings::from_config(config)));
    Ok(Consumer::new(
        channel,
        worker,
        ConsumerConfig::from_config(config),
    ))
}
