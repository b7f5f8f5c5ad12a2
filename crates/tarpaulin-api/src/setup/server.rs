//! Server startup and graceful shutdown

use anyhow::Result;
use axum::Router;
use tarpaulin_core::Config;
use tarpaulin_infra::shutdown_signal;

/// Serve until SIGINT or SIGTERM, then drain in-flight requests.
pub async fn start_server(config: &Config, app: Router) -> Result<()> {
    let addr = format!("0.0.0.0:{}", config.server_port());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(
        addr = %addr,
        max_image_mb = config.max_image_size_bytes() / 1024 / 1024,
        allowed_content_types = %config.allowed_content_types().join(","),
        queue = %config.image_queue(),
        "Server ready and accepting connections"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
