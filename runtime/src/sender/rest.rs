//! REST strategy: path template lookup, interpolation and a JSON round trip.

use super::TransportStrategy;
use reqwest::{Client, Method, Url};
use serde_json::Value;
use std::collections::BTreeMap;
use tracemesh_core::{
    ApiItem, BoxFuture, DispatchErrorKind, Envelope, RemoteStatus, RestMethod,
    SPAN_CONTEXT_HEADER, Target, Transport,
};

/// Issues HTTP calls with JSON bodies through a shared [`Client`].
pub struct RestStrategy {
    client: Client,
}

impl RestStrategy {
    /// Strategy over an already configured client.
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    fn resolve_url(
        item: &ApiItem,
        target: &Target,
        url_params: &BTreeMap<String, String>,
    ) -> Result<(RestMethod, Url), DispatchErrorKind> {
        let endpoint = item.rest.get(&target.key).ok_or_else(|| {
            DispatchErrorKind::Resolution(format!(
                "no REST endpoint '{}' on service '{}'",
                target.key, target.service
            ))
        })?;
        let segments = interpolate_path(&endpoint.path, url_params)?;

        let mut url = Url::parse(&item.base_url).map_err(|e| {
            DispatchErrorKind::Resolution(format!("invalid base url '{}': {e}", item.base_url))
        })?;
        url.path_segments_mut()
            .map_err(|()| {
                DispatchErrorKind::Resolution(format!("base url '{}' cannot hold a path", item.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok((endpoint.method, url))
    }
}

/// Expand a path template into URL path segments.
///
/// `:name` and `{name}` segments are replaced by `params[name]`; the other
/// segments are kept verbatim. Empty segments are dropped. Values are
/// percent-encoded later, when the segments are appended to the URL.
///
/// # Errors
///
/// Returns [`DispatchErrorKind::Resolution`] when a named segment has no
/// value.
pub fn interpolate_path(
    template: &str,
    params: &BTreeMap<String, String>,
) -> Result<Vec<String>, DispatchErrorKind> {
    template
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let name = segment
                .strip_prefix(':')
                .or_else(|| segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')));
            match name {
                Some(name) => params.get(name).cloned().ok_or_else(|| {
                    DispatchErrorKind::Resolution(format!(
                        "missing url parameter '{name}' for path '{template}'"
                    ))
                }),
                None => Ok(segment.to_string()),
            }
        })
        .collect()
}

const fn to_method(method: RestMethod) -> Method {
    match method {
        RestMethod::Get => Method::GET,
        RestMethod::Post => Method::POST,
        RestMethod::Put => Method::PUT,
        RestMethod::Patch => Method::PATCH,
        RestMethod::Delete => Method::DELETE,
    }
}

impl TransportStrategy for RestStrategy {
    fn transport(&self) -> Transport {
        Transport::Rest
    }

    fn dispatch<'a>(
        &'a self,
        item: &'a ApiItem,
        target: &'a Target,
        envelope: Envelope,
    ) -> BoxFuture<'a, Result<Option<Value>, DispatchErrorKind>> {
        Box::pin(async move {
            let (method, url) = Self::resolve_url(item, target, &envelope.meta.url_params)?;
            tracing::debug!(%method, %url, "Sending REST request");

            let mut request = self.client.request(to_method(method), url);
            if !envelope.meta.query.is_empty() {
                request = request.query(&envelope.meta.query);
            }
            if let Some(carrier) = &envelope.carrier {
                request = request.header(SPAN_CONTEXT_HEADER, carrier.header_value());
                if let Some(credential) = &carrier.credential {
                    request = request.bearer_auth(credential);
                }
            }
            if method.has_body() {
                request = request.json(&envelope.body);
            }

            let response = request
                .send()
                .await
                .map_err(|e| DispatchErrorKind::Transport(e.to_string()))?;
            let status = response.status();
            let bytes = response
                .bytes()
                .await
                .map_err(|e| DispatchErrorKind::Transport(e.to_string()))?;

            if !status.is_success() {
                return Err(DispatchErrorKind::Remote {
                    status: RemoteStatus::Http(status.as_u16()),
                    body: String::from_utf8_lossy(&bytes).into_owned(),
                });
            }
            if bytes.iter().all(u8::is_ascii_whitespace) {
                return Ok(None);
            }
            serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| DispatchErrorKind::Serialization(format!("response body: {e}")))
        })
    }
}
