//! Order service binary.

use anyhow::Context;
use std::sync::Arc;
use tracemesh_services::order::{self, OrderService};
use tracemesh_services::{ServiceConfig, lifecycle, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env("order").context("config")?;
    telemetry::init_tracing(&config).context("telemetry")?;
    let _metrics = lifecycle::start_metrics(&config).context("metrics")?;

    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("bind {}", config.http_addr))?;
    tracing::info!(addr = %config.http_addr, "Order service listening");
    axum::serve(listener, order::router(Arc::new(OrderService::new())))
        .with_graceful_shutdown(lifecycle::wait_for_signal())
        .await?;

    telemetry::shutdown_tracing();
    Ok(())
}
