//! # Tracemesh Runtime
//!
//! Dispatch and consumption runtime for tracemesh services.
//!
//! ## Core Components
//!
//! - **Sender** ([`sender`]): one call site over REST, RPC and Events
//! - **Event Controller** ([`consumer`]): cancellable, bounded read loop that
//!   dispatches each broker message to its own handler task
//! - **RPC server** ([`rpc_server`]): unary gRPC handlers that continue the
//!   caller's trace
//! - **Metrics** ([`metrics`]): Prometheus exporter and request meters
//! - **Backoff** ([`backoff`]): delay schedule for transient broker failures
//!
//! ## Example
//!
//! ```ignore
//! use tracemesh_runtime::consumer::{EventController, Telemetry};
//! use tokio_util::sync::CancellationToken;
//!
//! let controller = EventController::new(queue, "payment-service", Telemetry::new("payment"));
//! let cancel = CancellationToken::new();
//!
//! controller
//!     .listen(cancel.clone(), |delivery: Delivery| async move {
//!         let payment: Payment = delivery.decode()?;
//!         Ok(())
//!     })
//!     .await?;
//! ```

/// Exponential backoff for transient broker failures
pub mod backoff;

/// Event consumer core
pub mod consumer;

/// Prometheus metrics for observability
pub mod metrics;

/// Unary gRPC server with trace-context recovery
pub mod rpc_server;

/// Transport-polymorphic dispatch layer
pub mod sender;

pub use consumer::{
    ControllerState, Delivery, EventController, EventHandler, ListenOptions, ShutdownMode,
    Telemetry,
};
pub use rpc_server::{RpcRequest, RpcRouter};
pub use sender::{Sender, SenderBuilder, SenderError, TransportStrategy};
