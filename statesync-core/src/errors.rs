//! State-synchronization error hierarchy
//!
//! Errors are categorized by the layer that raises them: configuration
//! problems surface synchronously before any I/O, transport problems
//! propagate through the optimistic-rollback machinery, and push/durable
//! problems are absorbed (logged) without failing consumer futures.
//!
//! The whole hierarchy is `Clone`: deduplicated in-flight requests share
//! one future, so a single failure must fan out to every waiter.

use std::sync::Arc;

use serde_json::Value;

use crate::params::Params;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A required adapter operation is unconfigured at call time
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A URL template variable has no matching parameter
    #[error(transparent)]
    UrlTemplate(#[from] UrlTemplateError),

    /// Non-2xx response, network failure, or body parse failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A mutation addressed a record that is not present in memory
    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    /// A push event body could not be decoded
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A durable write was rejected by the backing store
    #[error(transparent)]
    Quota(#[from] QuotaError),
}

impl Error {
    /// The resolved endpoint, when the error originated at the
    /// transport. Error hooks receive it through [`ErrorMeta`].
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            Error::Transport(error) => Some(error.url()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The store was asked to perform an operation none of its adapters provide
    #[error("store `{store_id}` has no `{operation}` operation configured")]
    MissingOperation {
        store_id: String,
        operation: &'static str,
    },

    /// A record-addressed operation was invoked without an `id`
    #[error("store `{store_id}`: `{operation}` requires an `id`")]
    MissingId {
        store_id: String,
        operation: &'static str,
    },

    /// A remote adapter was used while the engine has no transport
    #[error("no transport configured; call `EngineConfig::builder().transport(..)` first")]
    MissingTransport,
}

/// Raised before any network call when a `:name` template segment has no
/// same-named parameter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("URL template `{template}` references `:{variable}` but no such parameter was supplied")]
pub struct UrlTemplateError {
    pub template: String,
    pub variable: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Server replied with a non-2xx status.
    ///
    /// The message is drawn from `body.message`, then `body.error`, then
    /// `HTTP <status>`.
    #[error("{message}")]
    Status {
        status: u16,
        message: String,
        url: String,
    },

    /// The request never produced a response
    #[error("request to `{url}` failed: {reason}")]
    Network { url: String, reason: String },

    /// The response arrived but its body could not be decoded as JSON
    #[error("response body from `{url}` is not valid JSON: {reason}")]
    Body { url: String, reason: String },
}

impl TransportError {
    /// The endpoint the failing request addressed.
    pub fn url(&self) -> &str {
        match self {
            TransportError::Status { url, .. }
            | TransportError::Network { url, .. }
            | TransportError::Body { url, .. } => url,
        }
    }

    /// Stamp the resolved endpoint onto an error whose producer did not
    /// know it (transports may leave `url` empty; the remote adapter
    /// fills it in before the error leaves the adapter).
    pub(crate) fn at(
        mut self,
        endpoint: &str,
    ) -> Self {
        match &mut self {
            TransportError::Status { url, .. }
            | TransportError::Network { url, .. }
            | TransportError::Body { url, .. } => {
                if url.is_empty() {
                    *url = endpoint.to_string();
                }
            }
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("store `{store_id}` holds no record with id `{id}`")]
pub struct NotFoundError {
    pub store_id: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("push event `{event}` payload is not parseable: {reason}")]
pub struct ParseError {
    pub event: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("durable write to `{key}` failed: {reason}")]
pub struct QuotaError {
    pub key: String,
    pub reason: String,
}

/// Context handed to error hooks alongside the error itself.
///
/// `rollback_data` carries the pre-mutation snapshot for failed optimistic
/// mutations; by the time a hook observes it, the store has already been
/// restored to exactly that value.
#[derive(Debug, Clone)]
pub struct ErrorMeta {
    /// Operation name (`get`, `patch`, ...)
    pub operation: &'static str,
    /// Resolved endpoint, when the error originated at the transport
    pub endpoint: Option<String>,
    /// Parameters of the failing call
    pub params: Option<Params>,
    /// Pre-mutation snapshot of the affected record
    pub rollback_data: Option<Value>,
}

impl ErrorMeta {
    pub fn for_operation(operation: &'static str) -> Self {
        Self {
            operation,
            endpoint: None,
            params: None,
            rollback_data: None,
        }
    }

    pub fn with_params(
        mut self,
        params: Params,
    ) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_rollback(
        mut self,
        rollback: Value,
    ) -> Self {
        self.rollback_data = Some(rollback);
        self
    }
}

/// Hook invoked with a failed operation's error and context.
///
/// Per-store hooks run before the global hook with the same arguments.
pub type ErrorHook = Arc<dyn Fn(&Error, &ErrorMeta) + Send + Sync>;
