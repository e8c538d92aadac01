//! Trace Context Carrier.
//!
//! A [`TraceCarrier`] is the explicit, versioned form of a parent span that
//! crosses process boundaries: trace id, span id, sampling flag and an
//! optional bearer credential. It is serialized as JSON into the
//! `span-context` HTTP header, the `span-context` gRPC metadata entry, or the
//! `span-context` broker message header.
//!
//! # Propagation
//!
//! ```text
//! caller span ──from_span()──► TraceCarrier ──embed()──► header bytes
//!                                                            │
//! child span ◄──attach_to()── TraceCarrier ◄──recover()──────┘
//! ```
//!
//! Absence is normal: a receiver without a carrier starts a root span.
//! A present but malformed carrier is reported as [`TraceContextError`] and
//! receivers treat it as absent.

use opentelemetry::Context as OtelContext;
use opentelemetry::trace::{
    SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState,
};
use serde::{Deserialize, Serialize};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Header, metadata and message-header key holding the serialized carrier.
pub const SPAN_CONTEXT_HEADER: &str = "span-context";

/// Current carrier format version.
pub const CARRIER_VERSION: u8 = 1;

/// Errors raised while recovering a carrier.
///
/// These never abort a request or a message; callers log them and continue
/// without a parent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TraceContextError {
    /// Header value is not valid carrier JSON.
    #[error("malformed trace context: {0}")]
    Malformed(String),

    /// Carrier was produced by an unknown format version.
    #[error("unsupported trace context version {0}")]
    UnsupportedVersion(u8),

    /// Trace or span id is not a valid, non-zero hex id.
    #[error("invalid {field}: {value:?}")]
    InvalidId {
        /// Which id was rejected.
        field: &'static str,
        /// The rejected value.
        value: String,
    },
}

/// Serializable parent-span reference plus optional bearer credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceCarrier {
    /// Format version, currently [`CARRIER_VERSION`].
    pub version: u8,
    /// 32 lowercase hex characters.
    pub trace_id: String,
    /// 16 lowercase hex characters.
    pub span_id: String,
    /// Whether the parent was sampled.
    pub sampled: bool,
    /// Bearer credential of the original caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl TraceCarrier {
    /// Build a carrier from raw ids.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, span_id: impl Into<String>, sampled: bool) -> Self {
        Self {
            version: CARRIER_VERSION,
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            sampled,
            credential: None,
        }
    }

    /// Attach a bearer credential.
    #[must_use]
    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    /// Build a carrier from an OpenTelemetry span context.
    ///
    /// Returns `None` for an invalid (empty) span context.
    #[must_use]
    pub fn from_span_context(span_context: &SpanContext) -> Option<Self> {
        if !span_context.is_valid() {
            return None;
        }
        Some(Self::new(
            format!("{:032x}", span_context.trace_id()),
            format!("{:016x}", span_context.span_id()),
            span_context.is_sampled(),
        ))
    }

    /// Embed: capture the active trace of a `tracing` span.
    ///
    /// Only produces a carrier when the span is backed by an OpenTelemetry
    /// layer; otherwise the call proceeds without trace propagation. The
    /// credential is carried even if no trace is active.
    #[must_use]
    pub fn from_span(span: &Span, credential: Option<String>) -> Option<Self> {
        let cx = span.context();
        let carrier = Self::from_span_context(cx.span().span_context());
        match (carrier, credential) {
            (Some(carrier), Some(credential)) => Some(carrier.with_credential(credential)),
            (Some(carrier), None) => Some(carrier),
            (None, Some(credential)) => Some(Self::credential_only(credential)),
            (None, None) => None,
        }
    }

    /// Carrier that transports a credential without any parent span.
    ///
    /// Its ids are all-zero, so [`TraceCarrier::to_context`] yields no parent.
    #[must_use]
    pub fn credential_only(credential: impl Into<String>) -> Self {
        Self::new("0".repeat(32), "0".repeat(16), false).with_credential(credential)
    }

    /// Whether this carrier references a real parent span.
    #[must_use]
    pub fn has_parent(&self) -> bool {
        self.span_context().is_ok()
    }

    /// Serialize the full carrier, credential included, to header bytes.
    ///
    /// Serializing a plain struct of strings cannot fail, so this returns the
    /// bytes directly.
    #[must_use]
    pub fn embed(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Serialize without the credential, for transports that carry the
    /// credential in a dedicated `authorization` field.
    #[must_use]
    pub fn header_value(&self) -> String {
        let stripped = Self {
            credential: None,
            ..self.clone()
        };
        serde_json::to_string(&stripped).unwrap_or_default()
    }

    /// Recover a carrier from header bytes.
    ///
    /// Empty or whitespace-only input means "no parent" and returns
    /// `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`TraceContextError`] when the input is present but is not a
    /// valid version-1 carrier.
    pub fn recover(bytes: &[u8]) -> Result<Option<Self>, TraceContextError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        let carrier: Self = serde_json::from_slice(bytes)
            .map_err(|e| TraceContextError::Malformed(e.to_string()))?;
        if carrier.version != CARRIER_VERSION {
            return Err(TraceContextError::UnsupportedVersion(carrier.version));
        }
        // A credential-only carrier is valid; a half-filled one is not.
        if carrier.credential.is_some() && carrier.is_zero() {
            return Ok(Some(carrier));
        }
        carrier.span_context()?;
        Ok(Some(carrier))
    }

    /// Parse the ids into an OpenTelemetry remote span context.
    ///
    /// # Errors
    ///
    /// Returns [`TraceContextError::InvalidId`] for malformed or zero ids.
    pub fn span_context(&self) -> Result<SpanContext, TraceContextError> {
        let trace_id = parse_id(&self.trace_id, 32)
            .and_then(|_| TraceId::from_hex(&self.trace_id).ok())
            .filter(|id| *id != TraceId::INVALID)
            .ok_or_else(|| invalid("trace_id", &self.trace_id))?;
        let span_id = parse_id(&self.span_id, 16)
            .and_then(|_| SpanId::from_hex(&self.span_id).ok())
            .filter(|id| *id != SpanId::INVALID)
            .ok_or_else(|| invalid("span_id", &self.span_id))?;
        let flags = if self.sampled {
            TraceFlags::SAMPLED
        } else {
            TraceFlags::default()
        };
        Ok(SpanContext::new(
            trace_id,
            span_id,
            flags,
            true,
            TraceState::default(),
        ))
    }

    /// OpenTelemetry context whose remote parent is this carrier.
    ///
    /// Falls back to an empty context (root) when the ids are unusable.
    #[must_use]
    pub fn to_context(&self) -> OtelContext {
        self.span_context().map_or_else(
            |_| OtelContext::new(),
            |sc| OtelContext::new().with_remote_span_context(sc),
        )
    }

    /// Parent a local span on this carrier.
    pub fn attach_to(&self, span: &Span) {
        if self.has_parent() {
            span.set_parent(self.to_context());
        }
    }

    fn is_zero(&self) -> bool {
        self.trace_id.bytes().all(|b| b == b'0') && self.span_id.bytes().all(|b| b == b'0')
    }
}

fn parse_id(value: &str, len: usize) -> Option<()> {
    let well_formed = value.len() == len
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    well_formed.then_some(())
}

fn invalid(field: &'static str, value: &str) -> TraceContextError {
    TraceContextError::InvalidId {
        field,
        value: value.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TRACE: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
    const SPAN: &str = "00f067aa0ba902b7";

    #[test]
    fn recover_empty_is_no_parent() {
        assert_eq!(TraceCarrier::recover(b"").unwrap(), None);
        assert_eq!(TraceCarrier::recover(b"  \n").unwrap(), None);
    }

    #[test]
    fn recover_rejects_garbage() {
        let err = TraceCarrier::recover(b"{not json").unwrap_err();
        assert!(matches!(err, TraceContextError::Malformed(_)));
    }

    #[test]
    fn recover_rejects_unknown_version() {
        let bytes = br#"{"version":9,"trace_id":"4bf92f3577b34da6a3ce929d0e0e4736","span_id":"00f067aa0ba902b7","sampled":true}"#;
        assert_eq!(
            TraceCarrier::recover(bytes).unwrap_err(),
            TraceContextError::UnsupportedVersion(9)
        );
    }

    #[test]
    fn recover_rejects_bad_ids() {
        let carrier = TraceCarrier::new("xyz", SPAN, true);
        let err = TraceCarrier::recover(&carrier.embed()).unwrap_err();
        assert!(matches!(err, TraceContextError::InvalidId { field: "trace_id", .. }));

        let carrier = TraceCarrier::new(TRACE, "0".repeat(16), true);
        let err = TraceCarrier::recover(&carrier.embed()).unwrap_err();
        assert!(matches!(err, TraceContextError::InvalidId { field: "span_id", .. }));
    }

    #[test]
    fn credential_only_carrier_round_trips_without_parent() {
        let carrier = TraceCarrier::credential_only("secret");
        let back = TraceCarrier::recover(&carrier.embed()).unwrap().unwrap();
        assert_eq!(back.credential.as_deref(), Some("secret"));
        assert!(!back.has_parent());
        assert!(!back.to_context().has_active_span());
    }

    #[test]
    fn header_value_strips_credential() {
        let carrier = TraceCarrier::new(TRACE, SPAN, true).with_credential("secret");
        let header = carrier.header_value();
        assert!(!header.contains("secret"));
        let back = TraceCarrier::recover(header.as_bytes()).unwrap().unwrap();
        assert_eq!(back.credential, None);
        assert_eq!(back.trace_id, TRACE);
    }

    #[test]
    fn to_context_holds_remote_parent() {
        let carrier = TraceCarrier::new(TRACE, SPAN, true);
        let cx = carrier.to_context();
        let sc = cx.span().span_context().clone();
        assert!(sc.is_remote());
        assert!(sc.is_sampled());
        assert_eq!(format!("{:032x}", sc.trace_id()), TRACE);
        assert_eq!(format!("{:016x}", sc.span_id()), SPAN);
    }

    #[test]
    fn from_span_without_otel_layer_only_carries_credential() {
        let span = tracing::info_span!("no_otel");
        assert_eq!(TraceCarrier::from_span(&span, None), None);
        let carrier = TraceCarrier::from_span(&span, Some("tok".to_string())).unwrap();
        assert!(!carrier.has_parent());
        assert_eq!(carrier.credential.as_deref(), Some("tok"));
    }

    #[test]
    fn from_span_captures_otel_span_context() {
        use opentelemetry::trace::TracerProvider as _;
        use tracing_subscriber::layer::SubscriberExt;

        let provider = opentelemetry_sdk::trace::TracerProvider::builder().build();
        let tracer = provider.tracer("carrier-test");
        let subscriber = tracing_subscriber::registry()
            .with(tracing_opentelemetry::layer().with_tracer(tracer));

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("caller");
            let carrier = TraceCarrier::from_span(&span, None).expect("span has a context");
            assert!(carrier.has_parent());

            let recovered = TraceCarrier::recover(&carrier.embed()).unwrap().unwrap();
            assert_eq!(recovered, carrier);
        });
    }

    proptest! {
        #[test]
        fn embed_recover_round_trip(
            trace in "[0-9a-f]{31}[1-9a-f]",
            span in "[1-9a-f][0-9a-f]{15}",
            sampled in any::<bool>(),
            credential in proptest::option::of("[A-Za-z0-9._-]{1,40}"),
        ) {
            let mut carrier = TraceCarrier::new(trace, span, sampled);
            carrier.credential = credential;
            let back = TraceCarrier::recover(&carrier.embed()).unwrap();
            prop_assert_eq!(back, Some(carrier));
        }
    }
}
