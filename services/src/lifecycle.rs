//! Start-up and shutdown steps shared by the service binaries.

use crate::config::ServiceConfig;
use std::sync::Arc;
use std::time::Duration;
use tracemesh_core::{MessageQueue, QueueError};
use tracemesh_redpanda::KafkaQueue;
use tracemesh_runtime::backoff::{self, Backoff};
use tracemesh_runtime::metrics::{MetricsError, MetricsServer};

/// Attempts at creating the topic while the broker starts.
const ENSURE_TOPIC_ATTEMPTS: u32 = 6;

/// Build the shared queue and make sure its topic exists.
///
/// Topic creation is retried with backoff, since the broker commonly starts
/// alongside the services.
///
/// # Errors
///
/// Returns [`QueueError`] if the clients cannot be built or the topic still
/// cannot be created after every attempt.
pub async fn connect_queue(config: &ServiceConfig) -> Result<Arc<KafkaQueue>, QueueError> {
    let queue = Arc::new(
        KafkaQueue::builder()
            .brokers(&config.kafka_brokers)
            .topic(&config.kafka_topic)
            .timeout(config.request_timeout)
            .build()?,
    );
    let schedule = Backoff::new(Duration::from_millis(500));
    backoff::retry("ensure topic", schedule, ENSURE_TOPIC_ATTEMPTS, || queue.ensure_topic()).await?;
    Ok(queue)
}

/// Start the Prometheus exporter when `METRICS_ADDR` is set.
///
/// # Errors
///
/// Returns [`MetricsError`] if the exporter cannot be started.
pub fn start_metrics(config: &ServiceConfig) -> Result<Option<MetricsServer>, MetricsError> {
    config
        .metrics_addr
        .map(|addr| {
            let mut server = MetricsServer::new(addr);
            server.start()?;
            Ok(server)
        })
        .transpose()
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => tracing::info!("Received Ctrl+C"),
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "Cannot listen for SIGTERM, waiting for Ctrl+C only");
                ctrl_c().await;
            },
        }
    }

    #[cfg(not(unix))]
    ctrl_c().await;
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C"),
        Err(e) => tracing::error!(error = %e, "Cannot listen for Ctrl+C, shutting down"),
    }
}
