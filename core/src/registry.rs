//! Service registry: where each named service lives and how its keys resolve.
//!
//! The [`Sender`](https://docs.rs/tracemesh-runtime) consults an
//! [`ApiRegistry`] on every call. [`ServiceCatalog`] is the in-tree
//! implementation, loaded from TOML:
//!
//! ```toml
//! [services.order]
//! base_url = "http://order:8081"
//!
//! [services.order.rest]
//! create = { method = "POST", path = "/order" }
//! process = { method = "POST", path = "/order/:id" }
//!
//! [services.payment]
//! base_url = "http://payment:9090"
//!
//! [services.payment.rpc]
//! GetPaymentInfo = "/payment.Payment/GetPaymentInfo"
//!
//! [services.payment.events]
//! process-payment = "payments"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// HTTP method of a REST endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RestMethod {
    /// GET
    Get,
    /// POST
    #[default]
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl RestMethod {
    /// Whether requests with this method carry a JSON body.
    #[must_use]
    pub const fn has_body(self) -> bool {
        !matches!(self, Self::Get | Self::Delete)
    }

    /// Uppercase method name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for RestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// REST endpoint: method plus path template with `:name` or `{name}` segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestEndpoint {
    /// HTTP method, `POST` when omitted.
    #[serde(default)]
    pub method: RestMethod,
    /// Path template, e.g. `/order/:id`.
    pub path: String,
}

impl RestEndpoint {
    /// Create an endpoint.
    #[must_use]
    pub fn new(method: RestMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }
}

/// Everything the dispatch layer knows about one service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiItem {
    /// Base URL (scheme, host, port) used for REST and RPC.
    #[serde(default)]
    pub base_url: String,
    /// REST key → endpoint.
    #[serde(default)]
    pub rest: BTreeMap<String, RestEndpoint>,
    /// RPC method name → gRPC path (`/package.Service/Method`).
    #[serde(default)]
    pub rpc: BTreeMap<String, String>,
    /// Event key → topic.
    #[serde(default)]
    pub events: BTreeMap<String, String>,
}

impl ApiItem {
    /// Create an item reachable at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Add a REST endpoint.
    #[must_use]
    pub fn with_rest(
        mut self,
        key: impl Into<String>,
        method: RestMethod,
        path: impl Into<String>,
    ) -> Self {
        self.rest.insert(key.into(), RestEndpoint::new(method, path));
        self
    }

    /// Add an RPC method.
    #[must_use]
    pub fn with_rpc(mut self, method: impl Into<String>, grpc_path: impl Into<String>) -> Self {
        self.rpc.insert(method.into(), grpc_path.into());
        self
    }

    /// Add an event key.
    #[must_use]
    pub fn with_event(mut self, key: impl Into<String>, topic: impl Into<String>) -> Self {
        self.events.insert(key.into(), topic.into());
        self
    }
}

/// Registry collaborator consulted at call time.
pub trait ApiRegistry: Send + Sync {
    /// Look up a service by name.
    fn get_api_item(&self, name: &str) -> Option<ApiItem>;
}

/// Static, deserializable service catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCatalog {
    /// Service name → item.
    #[serde(default)]
    pub services: BTreeMap<String, ApiItem>,
}

impl ServiceCatalog {
    /// Empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service.
    #[must_use]
    pub fn with_service(mut self, name: impl Into<String>, item: ApiItem) -> Self {
        self.services.insert(name.into(), item);
        self
    }

    /// Iterate over every `(service, item)` pair.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ApiItem)> {
        self.services.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl ApiRegistry for ServiceCatalog {
    fn get_api_item(&self, name: &str) -> Option<ApiItem> {
        self.services.get(name).cloned()
    }
}
