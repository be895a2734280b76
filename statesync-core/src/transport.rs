//! The external request transport
//!
//! The engine never talks to the network itself: stores hand fully-built
//! requests to a host-provided [`Transport`] (a `fetch`-shaped async
//! function) and interpret the raw response. The host decides how
//! requests actually travel, including any timeout policy; the core does
//! not interpose one.

use bytes::Bytes;
#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;

use crate::errors::TransportError;

/// HTTP verbs the adapter protocol maps operations onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

/// A fully-built request: resolved URL, headers from the configured
/// provider, JSON body already serialized.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

/// The raw reply. Status interpretation and body decoding happen in the
/// remote adapter, not in transport implementations.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_no_content(&self) -> bool {
        self.status == 204 || self.body.is_empty()
    }
}

/// Host-provided request/response function.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Perform one request to completion.
    ///
    /// Implementations return `Err` only for requests that never produced
    /// a response; a non-2xx reply is a normal `Ok` here and becomes a
    /// [`TransportError::Status`] in the adapter.
    async fn send(
        &self,
        request: TransportRequest,
    ) -> std::result::Result<TransportResponse, TransportError>;
}
