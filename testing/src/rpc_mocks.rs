//! Canned RPC methods.

use serde_json::Value;
use std::sync::{Mutex, PoisonError};
use tracemesh_core::{BoxFuture, DispatchErrorKind, RemoteStatus, RpcCall, RpcMethod};

type Responder = dyn Fn(&RpcCall) -> Result<Value, DispatchErrorKind> + Send + Sync;

/// [`RpcMethod`] answering from a closure and recording every call.
///
/// # Example
///
/// ```
/// use tracemesh_testing::StaticRpcMethod;
///
/// let method = StaticRpcMethod::ok(serde_json::json!({"status": "paid"}));
/// assert!(method.calls().is_empty());
/// ```
pub struct StaticRpcMethod {
    respond: Box<Responder>,
    calls: Mutex<Vec<RpcCall>>,
}

impl StaticRpcMethod {
    /// Method answering with `respond(call)`.
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&RpcCall) -> Result<Value, DispatchErrorKind> + Send + Sync + 'static,
    {
        Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Method that always answers `value`.
    #[must_use]
    pub fn ok(value: Value) -> Self {
        Self::new(move |_| Ok(value.clone()))
    }

    /// Method that always fails with gRPC status `code`.
    #[must_use]
    pub fn status(code: i32, message: &str) -> Self {
        let message = message.to_string();
        Self::new(move |_| {
            Err(DispatchErrorKind::Remote {
                status: RemoteStatus::Rpc(code),
                body: message.clone(),
            })
        })
    }

    /// Calls received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<RpcCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RpcMethod for StaticRpcMethod {
    fn invoke(&self, call: RpcCall) -> BoxFuture<'_, Result<Value, DispatchErrorKind>> {
        let result = (self.respond)(&call);
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
        Box::pin(async move { result })
    }
}
