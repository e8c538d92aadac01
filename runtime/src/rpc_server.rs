//! Unary gRPC server for hand-declared prost messages.
//!
//! The mirror of [`crate::sender::rpc::UnaryMethod`]: requests are decoded
//! with [`tonic_prost::ProstCodec`], the `span-context` and `authorization`
//! metadata are turned back into a [`TraceCarrier`], and the handler runs
//! under a `handle_rpc` span parented on the caller.
//!
//! ```ignore
//! struct PaymentRpc;
//! impl NamedService for PaymentRpc {
//!     const NAME: &'static str = "payment.Payment";
//! }
//!
//! let router = RpcRouter::<PaymentRpc>::new()
//!     .unary("GetPaymentInfo", move |request: RpcRequest<GetPaymentInfoRequest>| async move {
//!         lookup(&request.message).map_err(tonic::Status::from)
//!     });
//! rpc_server::serve(router, listener, cancel.cancelled_owned()).await?;
//! ```

use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::Status;
use tonic::body::Body;
use tonic::metadata::MetadataMap;
use tonic::server::{NamedService, UnaryService};
use tracemesh_core::{BoxFuture, SPAN_CONTEXT_HEADER, TraceCarrier};
use tracing::{Instrument, Span};

/// A decoded request with the caller's propagated context.
#[derive(Debug)]
pub struct RpcRequest<T> {
    /// Decoded message.
    pub message: T,
    /// Carrier rebuilt from the request metadata, credential included.
    pub carrier: Option<TraceCarrier>,
    /// The `handle_rpc` span the handler runs under.
    pub span: Span,
}

impl<T> RpcRequest<T> {
    /// Bearer credential presented by the caller.
    #[must_use]
    pub fn credential(&self) -> Option<&str> {
        self.carrier.as_ref()?.credential.as_deref()
    }
}

/// Carrier from `span-context` and `authorization: Bearer` metadata.
///
/// A malformed trace context is logged and dropped; the credential still
/// travels on a credential-only carrier.
#[must_use]
pub fn carrier_from_metadata(metadata: &MetadataMap) -> Option<TraceCarrier> {
    let carrier = metadata.get(SPAN_CONTEXT_HEADER).and_then(|value| {
        match TraceCarrier::recover(value.as_bytes()) {
            Ok(carrier) => carrier,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed trace context");
                None
            },
        }
    });
    let credential = metadata
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split_once(' '))
        .filter(|(scheme, token)| scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty())
        .map(|(_, token)| token.trim().to_string());

    match (carrier, credential) {
        (Some(carrier), Some(credential)) => Some(carrier.with_credential(credential)),
        (Some(carrier), None) => Some(carrier),
        (None, Some(credential)) => Some(TraceCarrier::credential_only(credential)),
        (None, None) => None,
    }
}

type Route =
    Arc<dyn Fn(http::Request<Body>) -> BoxFuture<'static, http::Response<Body>> + Send + Sync>;

/// Routes `/{N::NAME}/{method}` to unary handlers.
///
/// `N` only supplies the service name reported to tonic.
pub struct RpcRouter<N> {
    routes: Arc<HashMap<String, Route>>,
    _name: PhantomData<fn() -> N>,
}

impl<N> Clone for RpcRouter<N> {
    fn clone(&self) -> Self {
        Self {
            routes: Arc::clone(&self.routes),
            _name: PhantomData,
        }
    }
}

impl<N: NamedService> Default for RpcRouter<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: NamedService> RpcRouter<N> {
    /// Router with no methods; every call answers `UNIMPLEMENTED`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            routes: Arc::new(HashMap::new()),
            _name: PhantomData,
        }
    }

    /// Serve `method` with `handler`, replacing any previous handler.
    #[must_use]
    pub fn unary<Req, Resp, F, Fut>(mut self, method: &str, handler: F) -> Self
    where
        Req: prost::Message + Default + Send + 'static,
        Resp: prost::Message + Send + 'static,
        F: Fn(RpcRequest<Req>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
    {
        let path = format!("/{}/{method}", N::NAME);
        let adapter = UnaryAdapter {
            handler: Arc::new(handler),
            method: path.clone(),
            _types: PhantomData,
        };
        let route: Route = Arc::new(
            move |request: http::Request<Body>| -> BoxFuture<'static, http::Response<Body>> {
                let adapter = adapter.clone();
                Box::pin(async move {
                    let codec = tonic_prost::ProstCodec::<Resp, Req>::default();
                    let mut grpc = tonic::server::Grpc::new(codec);
                    grpc.unary(adapter, request).await
                })
            },
        );
        Arc::make_mut(&mut self.routes).insert(path, route);
        self
    }

    /// Registered paths, e.g. `/payment.Payment/GetPaymentInfo`.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }
}

impl<N: NamedService> NamedService for RpcRouter<N> {
    const NAME: &'static str = N::NAME;
}

impl<N> tower::Service<http::Request<Body>> for RpcRouter<N> {
    type Response = http::Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<Body>) -> Self::Future {
        let Some(route) = self.routes.get(request.uri().path()).cloned() else {
            let path = request.uri().path().to_string();
            return Box::pin(async move {
                tracing::debug!(%path, "Unknown gRPC method");
                Ok(Status::unimplemented(format!("unknown method {path}")).into_http())
            });
        };
        Box::pin(async move { Ok(route(request).await) })
    }
}

struct UnaryAdapter<Req, Resp, F> {
    handler: Arc<F>,
    method: String,
    _types: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp, F> Clone for UnaryAdapter<Req, Resp, F> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            method: self.method.clone(),
            _types: PhantomData,
        }
    }
}

impl<Req, Resp, F, Fut> UnaryService<Req> for UnaryAdapter<Req, Resp, F>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    F: Fn(RpcRequest<Req>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
{
    type Response = Resp;
    type Future = BoxFuture<'static, Result<tonic::Response<Resp>, Status>>;

    fn call(&mut self, request: tonic::Request<Req>) -> Self::Future {
        let carrier = carrier_from_metadata(request.metadata());
        let span = tracing::info_span!("handle_rpc", method = %self.method);
        if let Some(carrier) = &carrier {
            carrier.attach_to(&span);
        }
        let request = RpcRequest {
            message: request.into_inner(),
            carrier,
            span: span.clone(),
        };
        let handler = Arc::clone(&self.handler);
        Box::pin(
            async move {
                let result = handler(request).await;
                if let Err(status) = &result {
                    tracing::warn!(code = ?status.code(), error = status.message(), "RPC failed");
                }
                result.map(tonic::Response::new)
            }
            .instrument(span),
        )
    }
}

/// Serve `router` on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns the transport error that stopped the server.
pub async fn serve<N>(
    router: RpcRouter<N>,
    listener: TcpListener,
    shutdown: impl Future<Output = ()> + Send,
) -> Result<(), tonic::transport::Error>
where
    N: NamedService + 'static,
{
    let incoming = TcpListenerStream::new(listener);
    tonic::transport::Server::builder()
        .add_service(router)
        .serve_with_incoming_shutdown(incoming, shutdown)
        .await
}
