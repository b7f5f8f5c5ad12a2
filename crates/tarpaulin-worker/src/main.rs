use anyhow::Result;
use tarpaulin_core::Config;
use tarpaulin_infra::{init_telemetry, shutdown_signal};
use tarpaulin_worker::build_consumer;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    config.validate()?;

    init_telemetry(&config, "tarpaulin-worker")
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    tracing::info!(
        environment = %config.environment(),
        storage_backend = %config.storage_backend(),
        queue_backend = %config.queue_backend(),
        "Starting tarpaulin resize worker"
    );

    let consumer = build_consumer(&config).await?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });

    let stats = consumer.run(shutdown).await;

    tracing::info!(?stats, "Resize worker stopped");
    Ok(())
}
