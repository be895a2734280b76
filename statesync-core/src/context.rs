//! Engine context: the explicit process-wide singletons
//!
//! The shared cache and the shared request queue are process-wide *by
//! design*, but never hidden globals: a [`SyncContext`] carries them (and
//! the hot-swappable [`EngineConfig`] plus the host-signal channel) into
//! every store builder, so tests substitute fresh instances and
//! multi-tenant embeddings isolate their own.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::broadcast;
use tracing::debug;

use crate::adapter::queued::RequestQueue;
use crate::cache::StoreCache;
use crate::config::EngineConfig;
use crate::status::HostSignal;

/// Shared engine state handed to every store builder.
#[derive(Clone)]
pub struct SyncContext {
    cache: Arc<StoreCache>,
    queue: Arc<RequestQueue>,
    config: Arc<ArcSwap<EngineConfig>>,
    signals: broadcast::Sender<HostSignal>,
}

impl SyncContext {
    pub fn new(config: EngineConfig) -> Self {
        let (signals, _) = broadcast::channel(16);
        Self {
            cache: Arc::new(StoreCache::default()),
            queue: Arc::new(RequestQueue::new()),
            config: Arc::new(ArcSwap::from_pointee(config)),
            signals,
        }
    }

    /// The shared cache; store keys are namespaced per store.
    pub fn cache(&self) -> Arc<StoreCache> {
        self.cache.clone()
    }

    /// The shared FIFO for queued adapters.
    pub fn queue(&self) -> Arc<RequestQueue> {
        self.queue.clone()
    }

    /// The configuration as of now. Operations load it once at their
    /// call boundary and keep it for their whole lifetime.
    pub fn config(&self) -> Arc<EngineConfig> {
        self.config.load_full()
    }

    pub(crate) fn config_handle(&self) -> Arc<ArcSwap<EngineConfig>> {
        self.config.clone()
    }

    /// Swap the configuration. Applies to subsequent operations only.
    pub fn reconfigure(
        &self,
        config: EngineConfig,
    ) {
        debug!("engine reconfigured");
        self.config.store(Arc::new(config));
    }

    /// Deliver a host lifecycle signal to every monitor and push
    /// connection built from this context.
    pub fn emit(
        &self,
        signal: HostSignal,
    ) {
        // No receivers is fine: nothing is listening yet
        let _ = self.signals.send(signal);
    }

    pub(crate) fn subscribe_signals(&self) -> broadcast::Receiver<HostSignal> {
        self.signals.subscribe()
    }
}
