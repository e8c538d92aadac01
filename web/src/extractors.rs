//! Custom Axum extractors for the propagated request context.
//!
//! - [`BearerToken`]: credential from `Authorization: Bearer <token>`
//! - [`InboundTrace`]: carrier from the `span-context` header
//!
//! # Examples
//!
//! ```ignore
//! use tracemesh_web::extractors::{BearerToken, InboundTrace};
//!
//! async fn handler(token: Option<BearerToken>, trace: InboundTrace) -> Result<Json<Response>, AppError> {
//!     let carrier = trace.outgoing(token.map(|t| t.0));
//!     // pass `carrier.as_ref()` to Sender::perform_request
//! }
//! ```

use crate::error::AppError;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};
use tracemesh_core::{SPAN_CONTEXT_HEADER, TraceCarrier};
use tracing::Span;

/// Bearer credential presented by the caller.
///
/// Rejects with 401 when the header is missing or not a bearer token. Use
/// `Option<BearerToken>` for endpoints where the credential is optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerToken(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        bearer_token(&parts.headers)
            .map(Self)
            .ok_or_else(|| AppError::unauthorized("Missing bearer token"))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
}

/// Trace carrier received with the request, if any.
///
/// Taken from the request extensions when the trace-context middleware is
/// installed, otherwise parsed from the header. A malformed header is
/// logged and treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundTrace(pub Option<TraceCarrier>);

impl InboundTrace {
    /// Parse the `span-context` header.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let Some(value) = headers.get(SPAN_CONTEXT_HEADER) else {
            return Self(None);
        };
        match TraceCarrier::recover(value.as_bytes()) {
            Ok(carrier) => Self(carrier),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed trace context");
                Self(None)
            },
        }
    }

    /// Carrier for calls made while handling this request.
    ///
    /// Prefers the current span, which the middleware parents on the inbound
    /// carrier. Without an OpenTelemetry layer the inbound ids are forwarded
    /// unchanged. The credential is attached in both cases.
    #[must_use]
    pub fn outgoing(&self, credential: Option<String>) -> Option<TraceCarrier> {
        let current = TraceCarrier::from_span(&Span::current(), None).filter(TraceCarrier::has_parent);
        let carrier = current.or_else(|| self.0.clone().filter(TraceCarrier::has_parent));
        match (carrier, credential) {
            (Some(carrier), Some(credential)) => Some(carrier.with_credential(credential)),
            (Some(carrier), None) => Some(TraceCarrier {
                credential: None,
                ..carrier
            }),
            (None, Some(credential)) => Some(TraceCarrier::credential_only(credential)),
            (None, None) => None,
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for InboundTrace
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(trace) = parts.extensions.get::<Self>() {
            return Ok(trace.clone());
        }
        Ok(Self::from_headers(&parts.headers))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};

    const TRACE_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
    const SPAN_ID: &str = "00f067aa0ba902b7";

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder();
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).expect("Valid request").into_parts().0
    }

    #[tokio::test]
    async fn test_bearer_token_from_header() {
        let mut parts = parts(&[("authorization", "Bearer abc.def")]);
        let token = BearerToken::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(token, BearerToken("abc.def".to_string()));
    }

    #[tokio::test]
    async fn test_bearer_token_missing_is_unauthorized() {
        for headers in [vec![], vec![("authorization", "Basic dXNlcg==")], vec![("authorization", "Bearer ")]] {
            let mut parts = parts(&headers);
            let err = BearerToken::from_request_parts(&mut parts, &()).await.unwrap_err();
            assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn test_inbound_trace_from_header() {
        let carrier = TraceCarrier::new(TRACE_ID, SPAN_ID, true);
        let header = carrier.header_value();
        let mut parts = parts(&[(SPAN_CONTEXT_HEADER, header.as_str())]);
        let trace = InboundTrace::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(trace.0, Some(carrier));
    }

    #[tokio::test]
    async fn test_malformed_trace_is_absent() {
        let mut parts = parts(&[(SPAN_CONTEXT_HEADER, "{oops")]);
        let trace = InboundTrace::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(trace.0, None);
    }

    #[test]
    fn outgoing_forwards_inbound_ids_with_new_credential() {
        let inbound = InboundTrace(Some(TraceCarrier::new(TRACE_ID, SPAN_ID, true).with_credential("old")));

        let carrier = inbound.outgoing(Some("tok".to_string())).unwrap();
        assert_eq!(carrier.trace_id, TRACE_ID);
        assert_eq!(carrier.credential.as_deref(), Some("tok"));

        assert_eq!(inbound.outgoing(None).unwrap().credential, None);
    }

    #[test]
    fn outgoing_without_trace_carries_only_credential() {
        let carrier = InboundTrace(None).outgoing(Some("tok".to_string())).unwrap();
        assert!(!carrier.has_parent());
        assert_eq!(carrier.credential.as_deref(), Some("tok"));
        assert!(InboundTrace(None).outgoing(None).is_none());
    }
}
