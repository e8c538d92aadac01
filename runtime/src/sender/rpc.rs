//! RPC strategy: registered typed unary methods over lazily connected tonic
//! channels.

use super::TransportStrategy;
use http::uri::PathAndQuery;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error as _;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, Endpoint};
use tracemesh_core::{
    ApiItem, BoxFuture, DispatchErrorKind, Envelope, RemoteStatus, RpcCall, RpcMethod,
    SPAN_CONTEXT_HEADER, Target, TraceCarrier, Transport,
};

/// One lazily connected channel per service base URL.
#[derive(Clone)]
pub struct ChannelPool {
    timeout: Duration,
    channels: Arc<Mutex<HashMap<String, Channel>>>,
}

impl ChannelPool {
    /// Empty pool whose channels apply `timeout` to every call.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Channel for `base_url`, created on first use.
    ///
    /// Creation does not touch the network; the connection is made on the
    /// first call.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchErrorKind::Resolution`] for an unusable URL.
    pub fn channel(&self, base_url: &str) -> Result<Channel, DispatchErrorKind> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(channel) = channels.get(base_url) {
            return Ok(channel.clone());
        }
        let channel = Endpoint::from_shared(base_url.to_string())
            .map_err(|e| {
                DispatchErrorKind::Resolution(format!("invalid RPC endpoint '{base_url}': {e}"))
            })?
            .connect_timeout(self.timeout)
            .timeout(self.timeout)
            .connect_lazy();
        tracing::debug!(base_url, "gRPC channel created");
        channels.insert(base_url.to_string(), channel.clone());
        Ok(channel)
    }
}

/// A typed unary method called through [`tonic::client::Grpc`].
///
/// `Req` is built from the JSON input and `Resp` is converted back to JSON,
/// so the types must be both prost messages and serde types.
pub struct UnaryMethod<Req, Resp> {
    channels: ChannelPool,
    _types: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> UnaryMethod<Req, Resp> {
    /// Method whose channels come from `channels`.
    #[must_use]
    pub const fn new(channels: ChannelPool) -> Self {
        Self {
            channels,
            _types: PhantomData,
        }
    }
}

impl<Req, Resp> RpcMethod for UnaryMethod<Req, Resp>
where
    Req: prost::Message + DeserializeOwned + Send + Sync + 'static,
    Resp: prost::Message + Default + Serialize + Send + Sync + 'static,
{
    fn invoke(&self, call: RpcCall) -> BoxFuture<'_, Result<Value, DispatchErrorKind>> {
        Box::pin(async move {
            let path = PathAndQuery::try_from(call.path.as_str()).map_err(|e| {
                DispatchErrorKind::Resolution(format!("invalid gRPC path '{}': {e}", call.path))
            })?;
            let message: Req = serde_json::from_value(call.body)
                .map_err(|e| DispatchErrorKind::Serialization(format!("request: {e}")))?;
            let request = with_metadata(tonic::Request::new(message), call.carrier.as_ref());
            let channel = self.channels.channel(&call.base_url)?;

            let mut grpc = tonic::client::Grpc::new(channel);
            grpc.ready()
                .await
                .map_err(|e| DispatchErrorKind::Transport(format!("channel not ready: {e}")))?;
            let codec = tonic_prost::ProstCodec::<Req, Resp>::default();
            let response = grpc
                .unary(request, path, codec)
                .await
                .map_err(|status| status_to_kind(&status))?;

            serde_json::to_value(response.into_inner())
                .map_err(|e| DispatchErrorKind::Serialization(format!("response: {e}")))
        })
    }
}

fn with_metadata<T>(mut request: tonic::Request<T>, carrier: Option<&TraceCarrier>) -> tonic::Request<T> {
    let Some(carrier) = carrier else {
        return request;
    };
    let metadata = request.metadata_mut();
    match MetadataValue::try_from(carrier.header_value()) {
        Ok(value) => {
            metadata.insert(SPAN_CONTEXT_HEADER, value);
        },
        Err(e) => tracing::warn!(error = %e, "Trace context is not valid metadata, not sent"),
    }
    if let Some(credential) = &carrier.credential {
        match MetadataValue::try_from(format!("Bearer {credential}")) {
            Ok(value) => {
                metadata.insert("authorization", value);
            },
            Err(e) => tracing::warn!(error = %e, "Credential is not valid metadata, not sent"),
        }
    }
    request
}

/// Classify a non-OK status.
///
/// Connection failures surface from tonic as a status whose source is a
/// transport error; those become `Transport`. Everything else is `Remote`.
#[must_use]
pub fn status_to_kind(status: &tonic::Status) -> DispatchErrorKind {
    let is_transport = status
        .source()
        .is_some_and(|source| source.downcast_ref::<tonic::transport::Error>().is_some());
    if is_transport {
        return DispatchErrorKind::Transport(status.message().to_string());
    }
    DispatchErrorKind::Remote {
        status: RemoteStatus::Rpc(status.code() as i32),
        body: status.message().to_string(),
    }
}

/// Routes RPC calls to methods registered per `(service, key)`.
pub struct RpcStrategy {
    channels: ChannelPool,
    methods: HashMap<(String, String), Arc<dyn RpcMethod>>,
}

impl RpcStrategy {
    /// Strategy with no registered methods.
    #[must_use]
    pub fn new(channels: ChannelPool) -> Self {
        Self {
            channels,
            methods: HashMap::new(),
        }
    }

    /// Shared channel pool.
    #[must_use]
    pub const fn channels(&self) -> &ChannelPool {
        &self.channels
    }

    /// Register `method` as `service.key`, replacing any previous one.
    pub fn register(&mut self, service: &str, key: &str, method: Arc<dyn RpcMethod>) {
        self.methods
            .insert((service.to_string(), key.to_string()), method);
    }
}

impl TransportStrategy for RpcStrategy {
    fn transport(&self) -> Transport {
        Transport::Rpc
    }

    fn dispatch<'a>(
        &'a self,
        item: &'a ApiItem,
        target: &'a Target,
        envelope: Envelope,
    ) -> BoxFuture<'a, Result<Option<Value>, DispatchErrorKind>> {
        Box::pin(async move {
            let path = item.rpc.get(&target.key).ok_or_else(|| {
                DispatchErrorKind::Resolution(format!(
                    "no RPC method '{}' on service '{}'",
                    target.key, target.service
                ))
            })?;
            let method = self
                .methods
                .get(&(target.service.clone(), target.key.clone()))
                .ok_or_else(|| {
                    DispatchErrorKind::Resolution(format!(
                        "no typed client registered for '{target}'"
                    ))
                })?;

            let call = RpcCall {
                base_url: item.base_url.clone(),
                path: path.clone(),
                body: envelope.body,
                carrier: envelope.carrier,
            };
            method.invoke(call).await.map(Some)
        })
    }
}
