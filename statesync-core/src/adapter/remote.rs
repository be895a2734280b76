//! Remote request/response adapter
//!
//! Maps the adapter protocol onto a REST-shaped service: URLs are built
//! from `:name` templates plus a query string, verbs follow the
//! conventional mapping (GET reads, POST `create`, PUT `set`, PATCH
//! `patch`, DELETE `delete`), and optional envelope keys wrap the
//! request body and unwrap the response body.
//!
//! Template and configuration problems surface synchronously inside the
//! operation future, before anything reaches the transport.

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use bytes::Bytes;
use futures::FutureExt;
use serde_json::Map;
use serde_json::Value;
use tracing::debug;
use tracing::error;

use super::AdapterOps;
use super::AdapterReply;
use super::OpFuture;
use crate::config::EngineConfig;
use crate::context::SyncContext;
use crate::errors::ConfigError;
use crate::errors::Result;
use crate::errors::TransportError;
use crate::errors::UrlTemplateError;
use crate::params::Params;
use crate::params::value_id_form;
use crate::transport::Method;
use crate::transport::TransportRequest;
use crate::transport::TransportResponse;

/// Builder for a remote backing.
///
/// # Typical Usage Flow
/// 1. Create with `RemoteAdapter::new("/users")`
/// 2. Chain configuration methods
/// 3. Finalize with `.into_ops(&ctx)` and hand the ops to a store
pub struct RemoteAdapter {
    list_endpoint: String,
    item_endpoint: String,
    data_key: Option<String>,
    request_key: Option<String>,
}

impl RemoteAdapter {
    /// A remote adapter over `list_endpoint`, with the item endpoint
    /// defaulting to `<list_endpoint>/:id`.
    pub fn new(list_endpoint: impl Into<String>) -> Self {
        let list_endpoint = list_endpoint.into();
        let item_endpoint = format!("{}/:id", list_endpoint.trim_end_matches('/'));
        Self {
            list_endpoint,
            item_endpoint,
            data_key: None,
            request_key: None,
        }
    }

    /// A remote adapter for a single-value resource: every operation,
    /// writes included, addresses `endpoint` itself (no `:id` segment).
    pub fn single(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        Self {
            list_endpoint: endpoint.clone(),
            item_endpoint: endpoint,
            data_key: None,
            request_key: None,
        }
    }

    /// Override the single-record endpoint template.
    pub fn item_endpoint(
        mut self,
        template: impl Into<String>,
    ) -> Self {
        self.item_endpoint = template.into();
        self
    }

    /// Response envelope: when present in the JSON body, the value at
    /// this key is the data and its top-level siblings become response
    /// metadata.
    pub fn data_key(
        mut self,
        key: impl Into<String>,
    ) -> Self {
        self.data_key = Some(key.into());
        self
    }

    /// Request envelope: the sent body becomes `{request_key: data}`.
    pub fn request_key(
        mut self,
        key: impl Into<String>,
    ) -> Self {
        self.request_key = Some(key.into());
        self
    }

    /// Materialize the operation record.
    pub fn into_ops(
        self,
        ctx: &SyncContext,
    ) -> AdapterOps {
        let shared = Arc::new(RemoteShared {
            config: ctx.config_handle(),
            list_endpoint: self.list_endpoint,
            item_endpoint: self.item_endpoint,
            data_key: self.data_key,
            request_key: self.request_key,
        });

        let s = shared.clone();
        let get: super::ReadOp =
            Arc::new(move |params| s.clone().perform(Method::Get, Endpoint::List, params, None));
        let s = shared.clone();
        let get_one: super::ReadOp =
            Arc::new(move |params| s.clone().perform(Method::Get, Endpoint::Item, params, None));
        let s = shared.clone();
        let create: super::CreateOp = Arc::new(move |data| {
            s.clone().perform(Method::Post, Endpoint::List, Params::new(), Some(data))
        });
        let s = shared.clone();
        let set: super::WriteOp = Arc::new(move |params, data| {
            s.clone().perform(Method::Put, Endpoint::Item, params, Some(data))
        });
        let s = shared.clone();
        let patch: super::WriteOp = Arc::new(move |params, data| {
            s.clone().perform(Method::Patch, Endpoint::Item, params, Some(data))
        });
        let s = shared;
        let delete: super::ReadOp = Arc::new(move |params| {
            s.clone().perform(Method::Delete, Endpoint::Item, params, None)
        });

        AdapterOps {
            get: Some(get),
            get_one: Some(get_one),
            create: Some(create),
            set: Some(set),
            patch: Some(patch),
            delete: Some(delete),
            stream: None,
            persist: None,
        }
    }
}

#[derive(Clone, Copy)]
enum Endpoint {
    List,
    Item,
}

struct RemoteShared {
    config: Arc<ArcSwap<EngineConfig>>,
    list_endpoint: String,
    item_endpoint: String,
    data_key: Option<String>,
    request_key: Option<String>,
}

impl RemoteShared {
    fn perform(
        self: Arc<Self>,
        method: Method,
        endpoint: Endpoint,
        params: Params,
        body: Option<Value>,
    ) -> OpFuture {
        async move {
            // One config load per operation: a reconfigure mid-flight
            // only affects subsequent operations.
            let config = self.config.load_full();
            let transport = config.transport().ok_or(ConfigError::MissingTransport)?;

            let template = match endpoint {
                Endpoint::List => &self.list_endpoint,
                Endpoint::Item => &self.item_endpoint,
            };
            // Template errors surface before any network call
            let url = build_url(config.base_url(), template, &params)?;

            let mut headers = config.headers().await;
            let body_bytes = match body {
                None => None,
                Some(data) => {
                    let wrapped = match &self.request_key {
                        None => data,
                        Some(key) => {
                            let mut envelope = Map::new();
                            envelope.insert(key.clone(), data);
                            Value::Object(envelope)
                        }
                    };
                    headers.push(("content-type".to_string(), "application/json".to_string()));
                    let encoded = serde_json::to_vec(&wrapped).map_err(|e| {
                        TransportError::Body {
                            url: url.clone(),
                            reason: e.to_string(),
                        }
                    })?;
                    Some(Bytes::from(encoded))
                }
            };

            debug!(method = method.as_str(), %url, "remote request");
            let response = transport
                .send(TransportRequest {
                    method,
                    url: url.clone(),
                    headers,
                    body: body_bytes,
                })
                .await;

            match response {
                Ok(response) => decode_response(response, self.data_key.as_deref(), &url),
                Err(err) => {
                    error!(method = method.as_str(), %url, %err, "remote request failed");
                    // Hooks report the endpoint even when the transport
                    // did not fill it in
                    Err(err.at(&url).into())
                }
            }
        }
        .boxed()
    }
}

/// Interpret the raw reply: non-2xx becomes a typed error with the
/// message drawn from `body.message`, then `body.error`, then
/// `HTTP <status>`; `204 No Content` yields no data with status
/// metadata; otherwise the JSON body is unwrapped per the envelope.
pub(crate) fn decode_response(
    response: TransportResponse,
    data_key: Option<&str>,
    url: &str,
) -> Result<AdapterReply> {
    if !response.is_success() {
        let message = serde_json::from_slice::<Value>(&response.body)
            .ok()
            .and_then(|body| {
                body.get("message")
                    .and_then(Value::as_str)
                    .or_else(|| body.get("error").and_then(Value::as_str))
                    .map(str::to_string)
            })
            .unwrap_or_else(|| format!("HTTP {}", response.status));
        return Err(TransportError::Status {
            status: response.status,
            message,
            url: url.to_string(),
        }
        .into());
    }

    if response.is_no_content() {
        let mut meta = Map::new();
        meta.insert("status".to_string(), Value::from(response.status));
        return Ok(AdapterReply {
            data: None,
            meta: Some(Value::Object(meta)),
        });
    }

    let body: Value = serde_json::from_slice(&response.body).map_err(|e| {
        TransportError::Body {
            url: url.to_string(),
            reason: e.to_string(),
        }
    })?;

    match data_key {
        Some(key) if body.is_object() => {
            let mut envelope = match body {
                Value::Object(map) => map,
                _ => unreachable!("checked is_object above"),
            };
            match envelope.remove(key) {
                // Key absent: the whole body is the data
                None => Ok(AdapterReply::with_data(Value::Object(envelope))),
                Some(data) => Ok(AdapterReply {
                    data: Some(data),
                    meta: if envelope.is_empty() {
                        None
                    } else {
                        Some(Value::Object(envelope))
                    },
                }),
            }
        }
        _ => Ok(AdapterReply::with_data(body)),
    }
}

/// Build the final URL: substitute `:name` path segments from `params`,
/// then serialize the unused parameters as a query string in insertion
/// order. A `:name` with no matching parameter fails synchronously.
pub(crate) fn build_url(
    base_url: &str,
    template: &str,
    params: &Params,
) -> std::result::Result<String, UrlTemplateError> {
    let mut used: HashSet<&str> = HashSet::new();

    let mut path = String::new();
    for (i, segment) in template.split('/').enumerate() {
        if i > 0 {
            path.push('/');
        }
        match template_variable(segment) {
            None => path.push_str(segment),
            Some(name) => {
                let value = params.get(name).ok_or_else(|| UrlTemplateError {
                    template: template.to_string(),
                    variable: name.to_string(),
                })?;
                // Borrow the name from the template, not the params map
                used.insert(name);
                path.push_str(&encode_component(&value_id_form(value)));
            }
        }
    }

    let mut url = if path.contains("://") || base_url.is_empty() {
        path
    } else {
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    };

    let query: Vec<String> = params
        .iter()
        .filter(|(key, _)| !used.contains(key))
        .map(|(key, value)| {
            format!(
                "{}={}",
                encode_component(key),
                encode_component(&value_id_form(value))
            )
        })
        .collect();
    if !query.is_empty() {
        url.push('?');
        url.push_str(&query.join("&"));
    }

    Ok(url)
}

/// `":identifier"` segments per the template grammar
/// (`[a-zA-Z_][a-zA-Z0-9_]*`); anything else is a literal.
pub(crate) fn template_variable(segment: &str) -> Option<&str> {
    let name = segment.strip_prefix(':')?;
    let mut chars = name.chars();
    let first = chars.next()?;
    if !(first.is_ascii_alphabetic() || first == '_') {
        return None;
    }
    if chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Some(name)
    } else {
        None
    }
}

/// RFC 3986 component encoding: everything outside the unreserved set
/// is percent-encoded.
pub(crate) fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => {
                out.push('%');
                out.push_str(&format!("{other:02X}"));
            }
        }
    }
    out
}
