//! Payment service binary: event consumer, `GetPaymentInfo` over gRPC and
//! health endpoints.

use anyhow::Context;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracemesh_core::MessageQueue;
use tracemesh_runtime::{EventController, Telemetry, rpc_server};
use tracemesh_services::payment::{self, PaymentService};
use tracemesh_services::{ServiceConfig, lifecycle, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env("payment").context("config")?;
    telemetry::init_tracing(&config).context("telemetry")?;
    let _metrics = lifecycle::start_metrics(&config).context("metrics")?;

    let queue = lifecycle::connect_queue(&config).await.context("message queue")?;
    let controller = Arc::new(EventController::new(
        queue.clone(),
        config.kafka_group_id.clone(),
        Telemetry::new(config.service.clone()),
    ));
    let service = Arc::new(PaymentService::new());
    let cancel = CancellationToken::new();

    let consumer = {
        let (controller, cancel) = (Arc::clone(&controller), cancel.clone());
        let service = Arc::clone(&service);
        tokio::spawn(async move { controller.listen(cancel, payment::handler(service)).await })
    };

    let grpc_listener = tokio::net::TcpListener::bind(config.grpc_addr)
        .await
        .with_context(|| format!("bind {}", config.grpc_addr))?;
    tracing::info!(addr = %config.grpc_addr, "Payment gRPC listening");
    let grpc = {
        let router = payment::rpc_router(Arc::clone(&service));
        let stopped = cancel.clone().cancelled_owned();
        tokio::spawn(rpc_server::serve(router, grpc_listener, stopped))
    };

    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("bind {}", config.http_addr))?;
    tracing::info!(addr = %config.http_addr, "Payment service listening");
    let http = {
        let app = payment::router(controller.state());
        let stopped = cancel.clone().cancelled_owned();
        tokio::spawn(async move { axum::serve(listener, app).with_graceful_shutdown(stopped).await })
    };

    lifecycle::wait_for_signal().await;
    tracing::info!("Shutting down");
    cancel.cancel();

    consumer.await.context("consumer task")??;
    http.await.context("http task")??;
    grpc.await.context("grpc task")??;
    queue.close().await?;
    telemetry::shutdown_tracing();
    Ok(())
}
