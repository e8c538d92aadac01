//! Axum edge plumbing for tracemesh services.
//!
//! Every service exposes HTTP through axum. This crate holds what their
//! handlers share: the error type that maps dispatch failures to statuses,
//! extractors for the caller's credential and trace context, the middleware
//! that continues the caller's trace, and health endpoints.
//!
//! # Request Flow
//!
//! 1. **Middleware** recovers the `span-context` header and opens a span
//! 2. **Extractors** hand the handler its [`BearerToken`] and [`InboundTrace`]
//! 3. **Handler** builds an outgoing carrier and calls the `Sender`
//! 4. **`AppError`** turns any dispatch failure into a status and JSON body
//!
//! # Example
//!
//! ```ignore
//! use tracemesh_web::{AppError, BearerToken, InboundTrace, trace_context_layer};
//!
//! async fn create_order(
//!     State(gateway): State<Arc<Gateway>>,
//!     token: Option<BearerToken>,
//!     trace: InboundTrace,
//!     Json(request): Json<NewOrder>,
//! ) -> Result<Json<Order>, AppError> {
//!     let carrier = trace.outgoing(token.map(|t| t.0));
//!     let order = gateway
//!         .sender
//!         .perform_request(Transport::Rest, "order", "create", &request, carrier.as_ref(), None)
//!         .await?;
//!     Ok(Json(order.unwrap_or_default()))
//! }
//!
//! let app = Router::new()
//!     .route("/order", post(create_order))
//!     .layer(trace_context_layer())
//!     .with_state(gateway);
//! ```

#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;

pub use error::AppError;
pub use extractors::{BearerToken, InboundTrace};
pub use middleware::{TraceContextLayer, trace_context_layer};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
