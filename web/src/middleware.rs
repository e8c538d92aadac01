//! Axum middleware continuing the caller's trace.
//!
//! # Example
//!
//! ```ignore
//! use axum::Router;
//! use tracemesh_web::middleware::trace_context_layer;
//!
//! let app = Router::new()
//!     .route("/order", post(create_order))
//!     .layer(trace_context_layer());
//! ```
//!
//! # Flow
//!
//! 1. **Recover** the carrier from the `span-context` header (malformed ⇒ absent)
//! 2. **Store** it in request extensions as [`InboundTrace`]
//! 3. **Create** an `http_request` span parented on the carrier
//! 4. **Run** the handler inside that span, so outgoing calls continue the trace

use crate::extractors::InboundTrace;
use axum::{extract::Request, response::Response};
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::Instrument;

/// Create a layer that continues the inbound trace for every request.
#[must_use]
pub const fn trace_context_layer() -> TraceContextLayer {
    TraceContextLayer
}

/// Layer for trace-context propagation.
#[derive(Clone, Copy, Debug, Default)]
pub struct TraceContextLayer;

impl<S> Layer<S> for TraceContextLayer {
    type Service = TraceContextMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TraceContextMiddleware { inner }
    }
}

/// Middleware service for trace-context propagation.
#[derive(Clone, Debug)]
pub struct TraceContextMiddleware<S> {
    inner: S,
}

impl<S> Service<Request> for TraceContextMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let inbound = InboundTrace::from_headers(req.headers());

        let span = tracing::info_span!(
            "http_request",
            otel.name = %format!("{} {}", req.method(), req.uri().path()),
            method = %req.method(),
            uri = %req.uri(),
            traced = inbound.0.as_ref().is_some_and(tracemesh_core::TraceCarrier::has_parent),
        );
        if let Some(carrier) = &inbound.0 {
            carrier.attach_to(&span);
        }
        req.extensions_mut().insert(inbound);

        let fut = self.inner.call(req);
        Box::pin(fut.instrument(span))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use axum::{Router, body::Body, http, routing::get};
    use tower::ServiceExt;
    use tracemesh_core::{SPAN_CONTEXT_HEADER, TraceCarrier};
    use tracemesh_testing::{otel_subscriber, trace_id_of};

    const TRACE_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";

    async fn current_trace_id() -> String {
        trace_id_of(&tracing::Span::current())
    }

    async fn inbound_span_id(trace: InboundTrace) -> String {
        trace.0.map(|c| c.span_id).unwrap_or_default()
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn handler_runs_in_span_parented_on_carrier() {
        let (_provider, subscriber) = otel_subscriber();
        let _guard = tracing::subscriber::set_default(subscriber);
        let app = Router::new()
            .route("/test", get(current_trace_id))
            .layer(trace_context_layer());
        let carrier = TraceCarrier::new(TRACE_ID, "00f067aa0ba902b7", true);

        let request = http::Request::builder()
            .uri("/test")
            .header(SPAN_CONTEXT_HEADER, carrier.header_value())
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(body_string(response).await, TRACE_ID);
    }

    #[tokio::test]
    async fn carrier_is_stored_in_extensions() {
        let app = Router::new()
            .route("/test", get(inbound_span_id))
            .layer(trace_context_layer());
        let carrier = TraceCarrier::new(TRACE_ID, "00f067aa0ba902b7", true);

        let request = http::Request::builder()
            .uri("/test")
            .header(SPAN_CONTEXT_HEADER, carrier.header_value())
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(body_string(response).await, "00f067aa0ba902b7");
    }

    #[tokio::test]
    async fn malformed_header_does_not_fail_the_request() {
        let app = Router::new()
            .route("/test", get(|| async { "ok" }))
            .layer(trace_context_layer());

        let request = http::Request::builder()
            .uri("/test")
            .header(SPAN_CONTEXT_HEADER, "not-json")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), 200);
    }
}
