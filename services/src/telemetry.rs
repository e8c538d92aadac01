//! Logging and trace export.
//!
//! `tracing` is the only instrumentation API. [`init_tracing`] installs:
//!
//! - an `EnvFilter` (`RUST_LOG`, falling back to the configured level)
//! - a fmt layer for structured console logs
//! - an OpenTelemetry layer exporting to Jaeger when an endpoint is set
//!
//! The OpenTelemetry layer is what gives spans the ids that
//! `TraceCarrier::from_span` captures; without it services still log but
//! do not propagate a trace.

use crate::config::ServiceConfig;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Errors from telemetry initialisation.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// The Jaeger pipeline could not be installed.
    #[error("Failed to install Jaeger exporter: {0}")]
    Exporter(#[from] opentelemetry::trace::TraceError),

    /// A global subscriber is already set.
    #[error("Failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Install the global subscriber for `config.service`.
///
/// # Errors
///
/// Returns error if the exporter cannot be built or a subscriber is
/// already installed.
pub fn init_tracing(config: &ServiceConfig) -> Result<(), TelemetryError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let otel = match &config.jaeger_endpoint {
        Some(endpoint) => {
            let tracer = opentelemetry_jaeger::new_agent_pipeline()
                .with_service_name(config.service.clone())
                .with_endpoint(endpoint)
                .install_simple()?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        },
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(otel)
        .try_init()?;

    tracing::info!(
        service = %config.service,
        jaeger = config.jaeger_endpoint.as_deref().unwrap_or("disabled"),
        "Tracing initialized"
    );
    Ok(())
}

/// Flush pending spans.
///
/// Call during graceful shutdown.
pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}
