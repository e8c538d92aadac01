//! Prometheus metrics for dispatch and consumption.
//!
//! This module provides metric collection for:
//! - Sender calls, per transport, service and outcome
//! - Event consumption (messages, read errors, handler failures, dead letters)
//! - Requests handled by a service, through [`RequestMeter`]
//!
//! # Example
//!
//! ```rust,no_run
//! use tracemesh_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Serve metrics on port 2222
//! let mut server = MetricsServer::new("0.0.0.0:2222".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:2222/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tracemesh_core::Transport;

pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics recorder
    #[error("Failed to install metrics recorder: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Installs the global recorder and serves `/metrics` over HTTP for
/// Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:2222`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the recorder and spawn the HTTP exporter.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or bound.
    ///
    /// # Note
    ///
    /// A second recorder in the same process (e.g. across tests) is skipped
    /// with a warning; metrics keep flowing to the first one.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
            return Ok(());
        }

        tokio::spawn(async move {
            if exporter.await.is_err() {
                tracing::error!("Metrics exporter stopped");
            }
        });
        self.handle = Some(handle);
        tracing::info!(
            addr = %self.addr,
            "Metrics server started - available at http://{}/metrics",
            self.addr
        );
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!(
        "tracemesh_requests_total",
        "Total number of Sender calls by transport, service and outcome"
    );
    describe_histogram!(
        "tracemesh_request_duration_seconds",
        "Time taken by Sender calls"
    );
    describe_counter!(
        "tracemesh_requests_handled_total",
        "Total number of requests handled by a service"
    );
    describe_counter!(
        "tracemesh_messages_consumed_total",
        "Total number of messages dispatched to handlers"
    );
    describe_counter!(
        "tracemesh_read_errors_total",
        "Total number of failed reads in the consumer loop"
    );
    describe_counter!(
        "tracemesh_handler_failures_total",
        "Total number of handler invocations that returned an error"
    );
    describe_counter!(
        "tracemesh_dead_letters_total",
        "Total number of messages republished to a dead-letter topic"
    );
    describe_gauge!(
        "tracemesh_handlers_in_flight",
        "Handler invocations currently running"
    );
}

/// Sender metrics recorder.
pub struct DispatchMetrics;

impl DispatchMetrics {
    /// Record one Sender call. `outcome` is `"ok"` or an error kind label.
    pub fn record(transport: Transport, service: &str, outcome: &'static str, duration: Duration) {
        counter!(
            "tracemesh_requests_total",
            "transport" => transport.as_str(),
            "service" => service.to_string(),
            "outcome" => outcome
        )
        .increment(1);
        histogram!(
            "tracemesh_request_duration_seconds",
            "transport" => transport.as_str()
        )
        .record(duration.as_secs_f64());
    }
}

/// Consumer loop metrics recorder.
pub struct ConsumerMetrics;

impl ConsumerMetrics {
    /// Record a message handed to a handler.
    pub fn record_consume(group: &str) {
        counter!("tracemesh_messages_consumed_total", "group" => group.to_string()).increment(1);
        gauge!("tracemesh_handlers_in_flight", "group" => group.to_string()).increment(1.0);
    }

    /// Record a finished handler invocation.
    pub fn record_handler_done(group: &str, failed: bool) {
        gauge!("tracemesh_handlers_in_flight", "group" => group.to_string()).decrement(1.0);
        if failed {
            counter!("tracemesh_handler_failures_total", "group" => group.to_string())
                .increment(1);
        }
    }

    /// Record a failed read.
    pub fn record_read_error(group: &str) {
        counter!("tracemesh_read_errors_total", "group" => group.to_string()).increment(1);
    }

    /// Record a message republished to the dead-letter topic.
    pub fn record_dead_letter(group: &str) {
        counter!("tracemesh_dead_letters_total", "group" => group.to_string()).increment(1);
    }
}

/// Per-service request counter handed to handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMeter {
    service: String,
}

impl RequestMeter {
    /// Meter labelled with `service`.
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// Service label.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Count one handled request for `operation`.
    pub fn inc_request_count(&self, operation: &str) {
        counter!(
            "tracemesh_requests_handled_total",
            "service" => self.service.clone(),
            "operation" => operation.to_string()
        )
        .increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[tokio::test]
    async fn metrics_server_creation() {
        let server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[tokio::test]
    async fn metrics_server_renders_recorded_metrics() {
        let mut server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        server.start().unwrap();

        DispatchMetrics::record(Transport::Rest, "order", "ok", Duration::from_millis(20));
        RequestMeter::new("payment").inc_request_count("process-payment");
        ConsumerMetrics::record_consume("payment-service");

        // Another test may have installed the recorder first.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("tracemesh_requests_total"));
            assert!(rendered.contains("tracemesh_requests_handled_total"));
            assert!(rendered.contains("tracemesh_messages_consumed_total"));
        }
    }

    #[test]
    fn request_meter_keeps_service_label() {
        let meter = RequestMeter::new("payment");
        assert_eq!(meter.service(), "payment");
        // Without a recorder the call is a no-op.
        meter.inc_request_count("get_payment_info");
    }
}
