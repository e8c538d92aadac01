//! # Tracemesh Core
//!
//! Core types and traits for transport-polymorphic service calls with
//! distributed trace propagation.
//!
//! ## Core Concepts
//!
//! - **Transport**: REST, RPC or Events, the wire mechanism of one call
//! - **Target**: `(service, key)` resolved through an [`ApiRegistry`]
//! - **Trace Context Carrier**: versioned, serializable parent-span reference
//!   plus optional bearer credential
//! - **Message Queue**: one broker topic, written with an embedded carrier and
//!   read through consumer-group readers
//!
//! The dispatch layer and the consumer loop live in `tracemesh-runtime`; the
//! Kafka implementation of [`MessageQueue`] lives in `tracemesh-redpanda`.
//!
//! ## Example
//!
//! ```
//! use tracemesh_core::{QueueMessage, TraceCarrier};
//!
//! let carrier = TraceCarrier::new("4bf92f3577b34da6a3ce929d0e0e4736", "00f067aa0ba902b7", true);
//! let message = QueueMessage::encode(Some(&carrier), &serde_json::json!({"amount": 42})).unwrap();
//!
//! assert_eq!(message.trace_carrier().unwrap(), Some(carrier));
//! ```

pub mod carrier;
pub mod error;
pub mod queue;
pub mod registry;
pub mod rpc;
pub mod transport;

pub use carrier::{CARRIER_VERSION, SPAN_CONTEXT_HEADER, TraceCarrier, TraceContextError};
pub use error::{DispatchError, DispatchErrorKind, QueueError, RemoteStatus, operation_name};
pub use queue::{
    BoxFuture, MessageQueue, MessageQueueExt, Position, QueueMessage, QueueReader,
    TOPIC_PARTITIONS, TOPIC_REPLICATION,
};
pub use registry::{ApiItem, ApiRegistry, RestEndpoint, RestMethod, ServiceCatalog};
pub use rpc::{RpcCall, RpcMethod};
pub use transport::{Envelope, RequestMeta, Target, Transport, UnknownTransport};
