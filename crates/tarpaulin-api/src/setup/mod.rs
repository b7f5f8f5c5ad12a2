//! Application setup and initialization

pub mod routes;
pub mod server;

use crate::state::AppState;
use anyhow::{Context, Result};
use std::sync::Arc;
use tarpaulin_core::Config;
use tarpaulin_infra::{connect_pool, run_migrations};
use tarpaulin_queue::{connect_with_retry, create_channel, QueueError, RetryPolicy};
use tarpaulin_storage::create_blob_store;

/// Open the blob store and the message channel, declaring the work queue.
///
/// Refused connections are retried per the configured [`RetryPolicy`].
pub async fn build_state(config: &Config) -> Result<Arc<AppState>> {
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
    let queue = config.image_queue();
    connect_with_retry(&policy, || channel.connect(queue))
        .await
        .with_context(|| format!("Failed to declare queue {}", queue))?;

    tracing::info!(
        storage_backend = %store.backend_type(),
        queue_backend = %channel.backend_type(),
        queue = %queue,
        "Backends ready"
    );

    Ok(Arc::new(AppState::new(config.clone(), store, channel)))
}

/// Build state and routes.
pub async fn initialize_app(config: &Config) -> Result<(Arc<AppState>, axum::Router)> {
    let state = build_state(config).await?;
    let router = routes::setup_routes(config, state.clone());
    Ok((state, router))
}
