//! API gateway binary.

use anyhow::Context;
use tracemesh_core::MessageQueue;
use tracemesh_services::gateway::{Gateway, default_catalog};
use tracemesh_services::{ServiceConfig, lifecycle, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env("gateway").context("config")?;
    telemetry::init_tracing(&config).context("telemetry")?;
    let _metrics = lifecycle::start_metrics(&config).context("metrics")?;

    let queue = lifecycle::connect_queue(&config).await.context("message queue")?;
    let catalog = config
        .load_catalog()?
        .unwrap_or_else(|| default_catalog(&config));
    let gateway = Gateway::new(catalog, queue.clone(), &config).context("sender")?;

    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("bind {}", config.http_addr))?;
    tracing::info!(addr = %config.http_addr, "Gateway listening");
    axum::serve(listener, gateway.router())
        .with_graceful_shutdown(lifecycle::wait_for_signal())
        .await?;

    tracing::info!("Shutting down");
    queue.close().await?;
    telemetry::shutdown_tracing();
    Ok(())
}
