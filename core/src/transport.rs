//! Transport kinds, call targets and request envelopes.
//!
//! A logical call is addressed by a [`Transport`] and a [`Target`]. The caller
//! picks the transport; the target names the downstream service and the
//! method, path key or event key to reach on it.

use crate::carrier::TraceCarrier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Wire mechanism used to reach a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Synchronous HTTP call with JSON bodies.
    Rest,
    /// Synchronous unary gRPC call.
    Rpc,
    /// Asynchronous event published to a broker topic.
    Events,
}

impl Transport {
    /// All transports, in routing-table order.
    pub const ALL: [Self; 3] = [Self::Rest, Self::Rpc, Self::Events];

    /// Stable lowercase name, used in metric labels and operation names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rest => "rest",
            Self::Rpc => "rpc",
            Self::Events => "events",
        }
    }

    /// Whether the transport produces a response for the caller.
    #[must_use]
    pub const fn is_synchronous(self) -> bool {
        !matches!(self, Self::Events)
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown transport name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown transport: {0}")]
pub struct UnknownTransport(pub String);

impl FromStr for Transport {
    type Err = UnknownTransport;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rest" | "http" => Ok(Self::Rest),
            "rpc" | "grpc" => Ok(Self::Rpc),
            "events" | "event" => Ok(Self::Events),
            _ => Err(UnknownTransport(s.to_string())),
        }
    }
}

/// Target descriptor: a service name plus a method, path key or event key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    /// Registered service name (e.g. `"order"`).
    pub service: String,
    /// Method or key on that service (e.g. `"create"`, `"GetPaymentInfo"`).
    pub key: String,
}

impl Target {
    /// Create a new target.
    #[must_use]
    pub fn new(service: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.service, self.key)
    }
}

/// Optional request metadata supplied by the caller.
///
/// Only the REST transport reads it today: `url_params` fill `:name` or
/// `{name}` segments of the resolved path template and `query` is appended as
/// a query string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    /// Values for named path segments.
    pub url_params: BTreeMap<String, String>,
    /// Query string pairs, sent in order.
    pub query: Vec<(String, String)>,
}

impl RequestMeta {
    /// Create empty metadata.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a URL parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.url_params.insert(name.into(), value.into());
        self
    }

    /// Add a query pair.
    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }
}

/// Request envelope owned by exactly one outbound call.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Payload already converted to the JSON data model.
    pub body: serde_json::Value,
    /// Trace context (and credential) of the caller, if any.
    pub carrier: Option<TraceCarrier>,
    /// Caller-supplied metadata.
    pub meta: RequestMeta,
}

impl Envelope {
    /// Bearer credential carried by this request, if any.
    #[must_use]
    pub fn credential(&self) -> Option<&str> {
        self.carrier.as_ref().and_then(|c| c.credential.as_deref())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn transport_parses_aliases() {
        assert_eq!("REST".parse::<Transport>().unwrap(), Transport::Rest);
        assert_eq!("grpc".parse::<Transport>().unwrap(), Transport::Rpc);
        assert_eq!("event".parse::<Transport>().unwrap(), Transport::Events);
        assert!("smtp".parse::<Transport>().is_err());
    }

    #[test]
    fn transport_serde_uses_lowercase() {
        let json = serde_json::to_string(&Transport::Events).unwrap();
        assert_eq!(json, "\"events\"");
        let back: Transport = serde_json::from_str("\"rpc\"").unwrap();
        assert_eq!(back, Transport::Rpc);
    }

    #[test]
    fn only_events_is_asynchronous() {
        let async_kinds: Vec<_> = Transport::ALL
            .into_iter()
            .filter(|t| !t.is_synchronous())
            .collect();
        assert_eq!(async_kinds, vec![Transport::Events]);
    }

    #[test]
    fn target_display() {
        assert_eq!(Target::new("order", "create").to_string(), "order.create");
    }

    #[test]
    fn envelope_credential_comes_from_carrier() {
        let carrier = TraceCarrier::new(
            "4bf92f3577b34da6a3ce929d0e0e4736",
            "00f067aa0ba902b7",
            true,
        )
        .with_credential("token-1");
        let envelope = Envelope {
            body: serde_json::Value::Null,
            carrier: Some(carrier),
            meta: RequestMeta::new(),
        };
        assert_eq!(envelope.credential(), Some("token-1"));
    }
}
