use anyhow::Result;
use tarpaulin_core::Config;
use tarpaulin_infra::init_telemetry;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    config.validate()?;

    init_telemetry(&config, "tarpaulin-api")
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    tracing::info!(
        environment = %config.environment(),
        storage_backend = %config.storage_backend(),
        queue_backend = %config.queue_backend(),
        "Starting tarpaulin API"
    );

    let (_state, router) = tarpaulin_api::initialize_app(&config).await?;
    tarpaulin_api::setup::server::start_server(&config, router).await?;

    tracing::info!("Tarpaulin API stopped");
    Ok(())
}
