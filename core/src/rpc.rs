//! Seam between the dispatch layer and typed RPC clients.
//!
//! The Sender works on JSON values; a [`RpcMethod`] converts the value into
//! the method's typed request, performs the unary call and converts the typed
//! response back. Production methods are tonic clients registered at wiring
//! time; tests register canned methods.

use crate::carrier::TraceCarrier;
use crate::error::DispatchErrorKind;
use crate::queue::BoxFuture;

/// One resolved unary RPC invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCall {
    /// Service base URL, e.g. `http://payment:9090`.
    pub base_url: String,
    /// gRPC path, e.g. `/payment.Payment/GetPaymentInfo`.
    pub path: String,
    /// Request body in the JSON data model.
    pub body: serde_json::Value,
    /// Caller trace context and credential, sent as call metadata.
    pub carrier: Option<TraceCarrier>,
}

/// A typed unary method reachable through the RPC transport.
pub trait RpcMethod: Send + Sync {
    /// Perform the call and return the response in the JSON data model.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchErrorKind::Serialization`] when the body does not fit
    /// the typed request, [`DispatchErrorKind::Remote`] for a non-OK status and
    /// [`DispatchErrorKind::Transport`] when the channel is unusable.
    fn invoke(&self, call: RpcCall) -> BoxFuture<'_, Result<serde_json::Value, DispatchErrorKind>>;
}
