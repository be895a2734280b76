//! Global engine configuration
//!
//! Configured once at startup and handed to [`SyncContext`]; later
//! reconfigurations swap the whole record and apply to subsequent
//! operations only; an operation keeps the configuration it loaded at
//! its call boundary.
//!
//! [`SyncContext`]: crate::context::SyncContext

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::errors::ErrorHook;
use crate::transport::Transport;

/// Produces the header set for one outgoing request. May be backed by a
/// synchronous closure or by something genuinely async (token refresh).
pub type HeaderProvider =
    Arc<dyn Fn() -> BoxFuture<'static, Vec<(String, String)>> + Send + Sync>;

/// Host-level configuration shared by every store in a [`SyncContext`].
///
/// [`SyncContext`]: crate::context::SyncContext
#[derive(Clone, Default)]
pub struct EngineConfig {
    base_url: String,
    transport: Option<Arc<dyn Transport>>,
    header_provider: Option<HeaderProvider>,
    on_error: Option<ErrorHook>,
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder {
            config: EngineConfig::default(),
        }
    }

    /// Base URL prepended to relative endpoint templates.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.clone()
    }

    /// Resolve the current header set.
    pub async fn headers(&self) -> Vec<(String, String)> {
        match &self.header_provider {
            Some(provider) => provider().await,
            None => Vec::new(),
        }
    }

    /// The global error hook; runs after any per-store hook.
    pub fn on_error(&self) -> Option<ErrorHook> {
        self.on_error.clone()
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("base_url", &self.base_url)
            .field("transport", &self.transport.is_some())
            .field("header_provider", &self.header_provider.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Builder for [`EngineConfig`].
///
/// # Typical Usage Flow
/// 1. Create with `EngineConfig::builder()`
/// 2. Chain configuration methods
/// 3. Finalize with `.build()`
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Set the base URL for relative endpoint templates (default: empty).
    pub fn base_url(
        mut self,
        base_url: impl Into<String>,
    ) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    /// Set the request transport.
    pub fn transport(
        mut self,
        transport: Arc<dyn Transport>,
    ) -> Self {
        self.config.transport = Some(transport);
        self
    }

    /// Set a synchronous header provider.
    pub fn headers<F>(
        self,
        provider: F,
    ) -> Self
    where
        F: Fn() -> Vec<(String, String)> + Send + Sync + 'static,
    {
        self.headers_async(move || {
            let headers = provider();
            Box::pin(async move { headers }) as BoxFuture<'static, _>
        })
    }

    /// Set an asynchronous header provider (token refresh and friends).
    pub fn headers_async<F>(
        mut self,
        provider: F,
    ) -> Self
    where
        F: Fn() -> BoxFuture<'static, Vec<(String, String)>> + Send + Sync + 'static,
    {
        self.config.header_provider = Some(Arc::new(provider));
        self
    }

    /// Set the global error hook.
    pub fn on_error(
        mut self,
        hook: ErrorHook,
    ) -> Self {
        self.config.on_error = Some(hook);
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}
