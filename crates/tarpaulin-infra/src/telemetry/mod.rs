//! Tracing initialization
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter` (from `RUST_LOG`)
//! and either a human-readable or JSON formatter.

use tarpaulin_core::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "tarpaulin=debug,tower_http=debug,sqlx=warn";

/// Initialize tracing for a service binary.
///
/// `LOG_FORMAT=json` selects JSON lines; anything else uses the pretty formatter.
pub fn init_telemetry(config: &Config, service_name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    if config.log_format() == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()?;
    }

    tracing::info!(
        service = service_name,
        environment = config.environment(),
        log_format = config.log_format(),
        "Telemetry initialized"
    );
    Ok(())
}
