//! # Tracemesh Testing
//!
//! Testing utilities and in-memory collaborators for tracemesh.
//!
//! This crate provides:
//! - [`InMemoryQueue`]: single-partition topic with consumer-group offsets
//! - [`StaticRpcMethod`]: canned RPC responses with call recording
//! - [`otel_subscriber`]: a subscriber exporting `tracing` spans to an
//!   in-process OpenTelemetry tracer, so span contexts can be asserted
//! - [`otel_capture`]: the same, keeping finished spans in
//!   [`CapturedSpans`] so parent links can be asserted
//!
//! ## Example
//!
//! ```ignore
//! use tracemesh_testing::{InMemoryQueue, otel_subscriber};
//!
//! #[tokio::test]
//! async fn consumer_recovers_trace() {
//!     let (_provider, subscriber) = otel_subscriber();
//!     let _guard = tracing::subscriber::set_default(subscriber);
//!     let queue = InMemoryQueue::new("payments");
//!     // ...
//! }
//! ```

/// In-memory message queue
pub mod queue_mocks;

/// Canned RPC methods
pub mod rpc_mocks;

pub use queue_mocks::{InMemoryQueue, InMemoryReader};
pub use rpc_mocks::StaticRpcMethod;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::export::trace::{ExportResult, SpanData, SpanExporter};
use opentelemetry_sdk::trace::TracerProvider;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use tracing_subscriber::layer::SubscriberExt;

/// Subscriber whose spans carry OpenTelemetry span contexts.
///
/// Keep the returned provider alive for as long as the subscriber is used.
#[must_use]
pub fn otel_subscriber() -> (TracerProvider, impl tracing::Subscriber + Send + Sync) {
    let provider = TracerProvider::builder().build();
    let tracer = provider.tracer("tracemesh-test");
    let subscriber =
        tracing_subscriber::registry().with(tracing_opentelemetry::layer().with_tracer(tracer));
    (provider, subscriber)
}

/// Finished OpenTelemetry spans, in the order they ended.
#[derive(Debug, Clone, Default)]
pub struct CapturedSpans {
    spans: Arc<Mutex<Vec<SpanData>>>,
}

impl CapturedSpans {
    /// Every span exported so far.
    #[must_use]
    pub fn finished(&self) -> Vec<SpanData> {
        self.spans.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Exported spans called `name`.
    #[must_use]
    pub fn named(&self, name: &str) -> Vec<SpanData> {
        self.finished()
            .into_iter()
            .filter(|span| span.name == name)
            .collect()
    }
}

impl SpanExporter for CapturedSpans {
    fn export(&mut self, batch: Vec<SpanData>) -> Pin<Box<dyn Future<Output = ExportResult> + Send + 'static>> {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(batch);
        Box::pin(std::future::ready(Ok(())))
    }
}

/// Like [`otel_subscriber`], exporting every sampled span to the returned
/// [`CapturedSpans`] as soon as it ends.
///
/// Export happens on a background thread; call
/// [`TracerProvider::force_flush`] before reading the spans.
#[must_use]
pub fn otel_capture() -> (TracerProvider, CapturedSpans, impl tracing::Subscriber + Send + Sync) {
    let spans = CapturedSpans::default();
    let provider = TracerProvider::builder()
        .with_simple_exporter(spans.clone())
        .build();
    let tracer = provider.tracer("tracemesh-test");
    let subscriber =
        tracing_subscriber::registry().with(tracing_opentelemetry::layer().with_tracer(tracer));
    (provider, spans, subscriber)
}

/// Hex trace id of the OpenTelemetry context behind `span`.
#[must_use]
pub fn trace_id_of(span: &tracing::Span) -> String {
    use opentelemetry::trace::TraceContextExt;
    use tracing_opentelemetry::OpenTelemetrySpanExt;

    format!("{:032x}", span.context().span().span_context().trace_id())
}
