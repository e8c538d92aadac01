//! Transport-polymorphic dispatch layer.
//!
//! [`Sender::perform_request`] is the one entry point for every outbound call.
//! Given a [`Transport`], a service name, a key and a typed input, it resolves
//! the target through the [`ApiRegistry`], hands a request [`Envelope`] to the
//! strategy for that transport and decodes the typed output.
//!
//! ```text
//!  perform_request(transport, service, key, input)
//!          │
//!          ├─ registry.get_api_item(service) ── None ──► Resolution
//!          │
//!          └─ match transport
//!               ├─ Rest   ─► RestStrategy   (reqwest, JSON)
//!               ├─ Rpc    ─► RpcStrategy    (registered typed methods, tonic)
//!               └─ Events ─► EventStrategy  (MessageQueue::write_message)
//! ```
//!
//! Every failure is a [`DispatchError`] naming the operation
//! (`"<transport> <service>.<key>"`). Nothing is retried here; credentials
//! are forwarded, never validated.

mod events;
mod rest;
mod rpc;

pub use events::EventStrategy;
pub use rest::{RestStrategy, interpolate_path};
pub use rpc::{ChannelPool, RpcStrategy, UnaryMethod, status_to_kind};

use crate::metrics::DispatchMetrics;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracemesh_core::{
    ApiItem, ApiRegistry, BoxFuture, DispatchError, DispatchErrorKind, Envelope, MessageQueue,
    RequestMeta, RpcMethod, Target, TraceCarrier, Transport, operation_name,
};
use tracing::Instrument;

/// Default timeout for synchronous calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One invocation strategy per [`Transport`] variant.
pub trait TransportStrategy: Send + Sync {
    /// Transport served by this strategy.
    fn transport(&self) -> Transport;

    /// Perform the call described by `envelope` against `item`.
    ///
    /// Returns `Ok(None)` when the transport has no response (events) or the
    /// remote answered with an empty body.
    fn dispatch<'a>(
        &'a self,
        item: &'a ApiItem,
        target: &'a Target,
        envelope: Envelope,
    ) -> BoxFuture<'a, Result<Option<Value>, DispatchErrorKind>>;
}

/// Errors raised while wiring a [`Sender`].
#[derive(Error, Debug)]
pub enum SenderError {
    /// The HTTP client could not be built.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// The dispatch layer.
///
/// Built once at start-up, then shared behind an `Arc`.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use tracemesh_core::{ApiItem, RestMethod, ServiceCatalog, Transport};
/// use tracemesh_runtime::sender::Sender;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let catalog = ServiceCatalog::new().with_service(
///     "order",
///     ApiItem::new("http://order:8081").with_rest("create", RestMethod::Post, "/order"),
/// );
/// let sender = Sender::builder(Arc::new(catalog)).build()?;
///
/// let order: Option<serde_json::Value> = sender
///     .perform_request(Transport::Rest, "order", "create", &serde_json::json!({}), None, None)
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct Sender {
    registry: Arc<dyn ApiRegistry>,
    rest: RestStrategy,
    rpc: RpcStrategy,
    events: EventStrategy,
}

impl Sender {
    /// Create a builder around `registry`.
    #[must_use]
    pub fn builder(registry: Arc<dyn ApiRegistry>) -> SenderBuilder {
        SenderBuilder {
            registry,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            queues: Vec::new(),
        }
    }

    /// Register a typed unary RPC method reachable as `service.key`.
    ///
    /// `Req` and `Resp` are prost messages that also implement serde, so the
    /// JSON input can become the typed request and the typed response can
    /// become the JSON output.
    pub fn register_rpc<Req, Resp>(&mut self, service: &str, key: &str)
    where
        Req: prost::Message + DeserializeOwned + Send + Sync + 'static,
        Resp: prost::Message + Default + Serialize + Send + Sync + 'static,
    {
        let method = UnaryMethod::<Req, Resp>::new(self.rpc.channels().clone());
        self.rpc.register(service, key, Arc::new(method));
    }

    /// Register any [`RpcMethod`] implementation as `service.key`.
    pub fn register_rpc_method(&mut self, service: &str, key: &str, method: Arc<dyn RpcMethod>) {
        self.rpc.register(service, key, method);
    }

    /// Strategy selected for `transport`.
    #[must_use]
    pub fn strategy(&self, transport: Transport) -> &dyn TransportStrategy {
        match transport {
            Transport::Rest => &self.rest,
            Transport::Rpc => &self.rpc,
            Transport::Events => &self.events,
        }
    }

    /// Perform one logical call.
    ///
    /// # Arguments
    ///
    /// * `transport` - wire mechanism chosen by the caller
    /// * `service`, `key` - target, resolved through the registry at call time
    /// * `input` - typed payload, serialized before any I/O
    /// * `carrier` - caller trace context and credential, attached to the call
    /// * `meta` - URL parameters and query pairs (REST only)
    ///
    /// Returns `Ok(None)` for [`Transport::Events`] and for empty REST
    /// responses.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] wrapping one of:
    /// - `Resolution`: unknown service, key, topic or path parameter; no I/O
    /// - `Serialization`: the input or output does not fit the wire format
    /// - `Remote`: the remote answered with a failure status
    /// - `Transport`: connection, timeout or broker failure
    pub async fn perform_request<I, O>(
        &self,
        transport: Transport,
        service: &str,
        key: &str,
        input: &I,
        carrier: Option<&TraceCarrier>,
        meta: Option<&RequestMeta>,
    ) -> Result<Option<O>, DispatchError>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let target = Target::new(service, key);
        let operation = operation_name(transport, &target);
        let span = tracing::info_span!(
            "perform_request",
            otel.name = %operation,
            transport = %transport,
            service = %service,
            key = %key,
        );

        async {
            let started = Instant::now();
            let result = self
                .dispatch(transport, &target, input, carrier, meta)
                .await
                .and_then(decode_output);
            let outcome = result.as_ref().map_or_else(DispatchErrorKind::label, |_| "ok");
            DispatchMetrics::record(transport, service, outcome, started.elapsed());

            result.map_err(|kind| {
                let err = DispatchError::new(transport, &target, kind);
                tracing::warn!(error = %err, "Dispatch failed");
                err
            })
        }
        .instrument(span)
        .await
    }

    async fn dispatch<I: Serialize + ?Sized>(
        &self,
        transport: Transport,
        target: &Target,
        input: &I,
        carrier: Option<&TraceCarrier>,
        meta: Option<&RequestMeta>,
    ) -> Result<Option<Value>, DispatchErrorKind> {
        let item = self.registry.get_api_item(&target.service).ok_or_else(|| {
            DispatchErrorKind::Resolution(format!("service '{}' is not registered", target.service))
        })?;
        let body = serde_json::to_value(input)
            .map_err(|e| DispatchErrorKind::Serialization(format!("input: {e}")))?;
        let envelope = Envelope {
            body,
            carrier: carrier.cloned(),
            meta: meta.cloned().unwrap_or_default(),
        };
        self.strategy(transport)
            .dispatch(&item, target, envelope)
            .await
    }
}

fn decode_output<O: DeserializeOwned>(value: Option<Value>) -> Result<Option<O>, DispatchErrorKind> {
    value
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| DispatchErrorKind::Serialization(format!("output: {e}")))
}

/// Builder for [`Sender`].
pub struct SenderBuilder {
    registry: Arc<dyn ApiRegistry>,
    timeout: Duration,
    queues: Vec<Arc<dyn MessageQueue>>,
}

impl SenderBuilder {
    /// Timeout applied to REST and RPC calls.
    ///
    /// Default: 10 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Make `queue` the publisher for its topic on the Events transport.
    #[must_use]
    pub fn queue(mut self, queue: Arc<dyn MessageQueue>) -> Self {
        self.queues.push(queue);
        self
    }

    /// Build the [`Sender`].
    ///
    /// # Errors
    ///
    /// Returns [`SenderError::HttpClient`] if the HTTP client cannot be built.
    pub fn build(self) -> Result<Sender, SenderError> {
        let client = reqwest::Client::builder().timeout(self.timeout).build()?;
        let mut events = EventStrategy::new();
        for queue in self.queues {
            events.register(queue);
        }
        tracing::info!(
            timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            topics = ?events.topics(),
            "Sender created"
        );
        Ok(Sender {
            registry: self.registry,
            rest: RestStrategy::new(client),
            rpc: RpcStrategy::new(ChannelPool::new(self.timeout)),
            events,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use tracemesh_core::ServiceCatalog;

    fn sender() -> Sender {
        Sender::builder(Arc::new(ServiceCatalog::new()))
            .build()
            .unwrap()
    }

    #[test]
    fn routing_is_total_and_deterministic() {
        let sender = sender();
        for transport in Transport::ALL {
            assert_eq!(sender.strategy(transport).transport(), transport);
            assert_eq!(sender.strategy(transport).transport(), transport);
        }
    }

    #[test]
    fn empty_output_decodes_to_none() {
        let out: Option<Value> = decode_output(None).unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn mismatched_output_is_serialization_error() {
        let err = decode_output::<u32>(Some(Value::String("x".into()))).unwrap_err();
        assert!(matches!(err, DispatchErrorKind::Serialization(_)));
    }

    #[tokio::test]
    async fn unserializable_input_fails_before_io() {
        use std::collections::HashMap;
        let catalog = ServiceCatalog::new().with_service(
            "order",
            ApiItem::new("http://127.0.0.1:1").with_rest("create", tracemesh_core::RestMethod::Post, "/order"),
        );
        let sender = Sender::builder(Arc::new(catalog)).build().unwrap();
        let mut bad = HashMap::new();
        bad.insert((1, 2), 3);

        let err = sender
            .perform_request::<_, Value>(Transport::Rest, "order", "create", &bad, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind_label(), "serialization");
        assert_eq!(err.operation, "rest order.create");
    }
}
