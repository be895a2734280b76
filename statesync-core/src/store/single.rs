//! Single-value store
//!
//! Holds zero-or-one record. `None` is *absent* (an explicit null),
//! distinct from *unfetched* (`status().last_updated == 0`). The
//! coordination is the collection store's, minus ordering concerns:
//! cache with stale-while-revalidate, request deduplication, optimistic
//! mutation with precise rollback, durable warm-start and mirroring.

use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use arc_swap::ArcSwap;
use futures::FutureExt;
use parking_lot::Mutex;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;
use tracing::warn;

use super::Inflight;
use super::report_error;
use super::shallow_merge;
use crate::adapter::AdapterOps;
use crate::bus::SubscriberBus;
use crate::bus::Subscription;
use crate::cache::StoreCache;
use crate::config::EngineConfig;
use crate::context::SyncContext;
use crate::errors::ErrorHook;
use crate::errors::ErrorMeta;
use crate::errors::Result;
use crate::handle::Resolver;
use crate::handle::StateHandle;
use crate::handle::navigate;
use crate::params::Params;
use crate::path::Path;
use crate::path::Segment;
use crate::status::MonitorOptions;
use crate::status::StatusMonitor;
use crate::status::StatusPatch;
use crate::status::StoreStatus;
use crate::store::collection::DEFAULT_CACHE_TTL;
use crate::utils::now_millis;

struct SingleInner {
    store_id: String,
    state: RwLock<Option<Value>>,
    meta: Mutex<Option<Value>>,
    bus: SubscriberBus,
    monitor: StatusMonitor,
    cache: Arc<StoreCache>,
    cache_ttl: Duration,
    ops: AdapterOps,
    inflight: Inflight,
    last_params: Mutex<Params>,
    on_error: Option<ErrorHook>,
    config: Arc<ArcSwap<EngineConfig>>,
    disposed: AtomicBool,
}

impl SingleInner {
    fn cache_key(
        &self,
        params: &Params,
    ) -> String {
        format!("{}:value:{}", self.store_id, params.stable_key())
    }

    fn store_prefix(&self) -> String {
        format!("{}:", self.store_id)
    }

    fn touch(&self) {
        self.monitor.set_status(StatusPatch::new().last_updated(now_millis()));
    }

    fn report(
        &self,
        error: &crate::errors::Error,
        mut meta: ErrorMeta,
    ) {
        // Transport failures carry the resolved endpoint; surface it to
        // the hooks alongside the operation context
        if meta.endpoint.is_none() {
            meta.endpoint = error.endpoint().map(str::to_string);
        }
        report_error(&self.on_error, &self.config.load().on_error(), error, &meta);
    }

    fn persist_save(&self) {
        if let Some(persist) = &self.ops.persist {
            let snapshot = self.state.read().clone().unwrap_or(Value::Null);
            if let Err(quota) = (persist.save)(&snapshot) {
                warn!(%quota, "durable mirror write failed, memory state stays authoritative");
            }
        }
    }

    fn store_value(
        &self,
        value: Option<Value>,
    ) {
        *self.state.write() = value;
    }
}

/// Reactive store for one entity.
#[derive(Clone)]
pub struct SingleStore {
    inner: Arc<SingleInner>,
}

/// Builder for [`SingleStore`].
pub struct SingleStoreBuilder {
    ctx: SyncContext,
    store_id: String,
    ops: AdapterOps,
    cache_ttl: Duration,
    monitor: MonitorOptions,
    on_error: Option<ErrorHook>,
}

impl SingleStore {
    pub fn builder(
        ctx: &SyncContext,
        store_id: impl Into<String>,
    ) -> SingleStoreBuilder {
        SingleStoreBuilder {
            ctx: ctx.clone(),
            store_id: store_id.into(),
            ops: AdapterOps::default(),
            cache_ttl: DEFAULT_CACHE_TTL,
            monitor: MonitorOptions::default(),
            on_error: None,
        }
    }
}

impl SingleStoreBuilder {
    /// Lay another adapter over the current composition.
    pub fn adapter(
        mut self,
        ops: AdapterOps,
    ) -> Self {
        self.ops = self.ops.merge(ops);
        self
    }

    pub fn cache_ttl(
        mut self,
        ttl: Duration,
    ) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn monitor(
        mut self,
        options: MonitorOptions,
    ) -> Self {
        self.monitor = options;
        self
    }

    pub fn on_error(
        mut self,
        hook: ErrorHook,
    ) -> Self {
        self.on_error = Some(hook);
        self
    }

    /// Build the store. Must run inside a tokio runtime.
    pub fn build(self) -> SingleStore {
        let inner = Arc::new_cyclic(|weak: &Weak<SingleInner>| {
            let reload_weak = weak.clone();
            let reload = Arc::new(move || {
                if let Some(inner) = reload_weak.upgrade() {
                    let store = SingleStore { inner };
                    let params = store.inner.last_params.lock().clone();
                    tokio::spawn(async move {
                        let _ = store.get(params.with(crate::params::FORCE_PARAM, true)).await;
                    });
                }
            });

            SingleInner {
                store_id: self.store_id,
                state: RwLock::new(None),
                meta: Mutex::new(None),
                bus: SubscriberBus::new(),
                monitor: StatusMonitor::spawn(
                    self.ctx.subscribe_signals(),
                    self.monitor,
                    reload,
                ),
                cache: self.ctx.cache(),
                cache_ttl: self.cache_ttl,
                ops: self.ops,
                inflight: Inflight::default(),
                last_params: Mutex::new(Params::new()),
                on_error: self.on_error,
                config: self.ctx.config_handle(),
                disposed: AtomicBool::new(false),
            }
        });

        if let Some(persist) = &inner.ops.persist {
            if let Some(value) = (persist.load)() {
                debug!(store = %inner.store_id, "warm start");
                *inner.state.write() = match value {
                    Value::Null => None,
                    present => Some(present),
                };
            }
        }

        SingleStore { inner }
    }
}

impl SingleStore {
    // ---- reads ----------------------------------------------------------

    /// Fetch the value. Concurrent calls with equal parameters share one
    /// transport request; a stale cache hit resolves immediately and
    /// refreshes in the background. `Ok(None)` is an explicit absence.
    pub async fn get(
        &self,
        params: Params,
    ) -> Result<Option<Value>> {
        let mut params = params;
        let force = params.take_force();
        *self.inner.last_params.lock() = params.clone();

        let cache_key = self.inner.cache_key(&params);
        if !force {
            if let Some(hit) = self.inner.cache.get(&cache_key, self.inner.cache_ttl) {
                if hit.stale {
                    self.inner
                        .monitor
                        .set_status(StatusPatch::new().revalidating(true));
                    let refresh = self.value_fetch(params, cache_key);
                    tokio::spawn(async move {
                        let _ = refresh.await;
                    });
                }
                return Ok(from_stored(hit.data));
            }
        }

        let initial = self.inner.monitor.status().last_updated == 0;
        self.inner.monitor.set_status(if initial {
            StatusPatch::new().loading(true)
        } else {
            StatusPatch::new().revalidating(true)
        });

        self.value_fetch(params, cache_key).await.map(from_stored)
    }

    fn value_fetch(
        &self,
        params: Params,
        cache_key: String,
    ) -> super::SharedFetch {
        let inner = self.inner.clone();
        let dedup_key = cache_key.clone();
        self.inner.inflight.join_or_insert(&cache_key, move || {
            async move {
                let outcome = Self::fetch_value(&inner, params, dedup_key.clone()).await;
                inner.inflight.remove(&dedup_key);
                outcome
            }
            .boxed()
            .shared()
        })
    }

    async fn fetch_value(
        inner: &Arc<SingleInner>,
        params: Params,
        cache_key: String,
    ) -> std::result::Result<Value, crate::errors::Error> {
        let op = inner.ops.require_get(&inner.store_id)?;
        match op(params.clone()).await {
            Ok(reply) => {
                let stored = reply.data.unwrap_or(Value::Null);
                inner.store_value(from_stored(stored.clone()));
                *inner.meta.lock() = reply.meta;
                inner.cache.set(cache_key, stored.clone());
                inner.monitor.set_status(
                    StatusPatch::new()
                        .loading(false)
                        .revalidating(false)
                        .error(None)
                        .last_updated(now_millis()),
                );
                inner.bus.notify_root();
                Ok(stored)
            }
            Err(error) => {
                inner.monitor.set_status(
                    StatusPatch::new()
                        .loading(false)
                        .revalidating(false)
                        .error(Some(error.to_string())),
                );
                let meta = ErrorMeta::for_operation("get").with_params(params);
                inner.report(&error, meta);
                Err(error)
            }
        }
    }

    // ---- mutations ------------------------------------------------------

    /// Optimistic full replacement. The adapter's returned value may
    /// differ from the input (server-assigned fields) and wins on
    /// reconciliation.
    pub async fn set(
        &self,
        value: Value,
    ) -> Result<Value> {
        let op = self.inner.ops.require_set(&self.inner.store_id)?;

        let previous = self.inner.state.read().clone();
        self.inner.store_value(Some(value.clone()));
        self.inner.cache.remove_prefix(&self.inner.store_prefix());
        self.inner.bus.notify_root();

        match op(Params::new(), value.clone()).await {
            Ok(reply) => {
                let reconciled = reply.data.unwrap_or(value);
                self.inner.store_value(from_stored(reconciled.clone()));
                self.inner.touch();
                self.inner.bus.notify_root();
                self.inner.persist_save();
                Ok(reconciled)
            }
            Err(error) => {
                self.inner.store_value(previous.clone());
                self.inner.bus.notify_root();
                let meta = ErrorMeta::for_operation("set")
                    .with_rollback(previous.unwrap_or(Value::Null));
                self.inner.report(&error, meta);
                Err(error)
            }
        }
    }

    /// Optimistic shallow merge. Subscribers of the touched top-level
    /// keys are notified precisely; an adapter reply carrying a full
    /// replacement falls back to a root notification.
    pub async fn patch(
        &self,
        partial: Value,
    ) -> Result<Value> {
        let op = self.inner.ops.require_patch(&self.inner.store_id)?;

        let previous = self.inner.state.read().clone();
        let base = previous.clone().unwrap_or(Value::Null);
        let merged = shallow_merge(&base, &partial);
        self.inner.store_value(Some(merged.clone()));
        self.inner.cache.remove_prefix(&self.inner.store_prefix());

        let field_paths: Vec<Path> = match &partial {
            Value::Object(changes) => changes
                .keys()
                .map(|key| Path::new([Segment::from(key.as_str())]))
                .collect(),
            _ => Vec::new(),
        };
        let root = vec![Path::root()];
        let optimistic_paths = if field_paths.is_empty() { &root } else { &field_paths };
        self.inner.bus.notify(optimistic_paths);

        match op(Params::new(), partial.clone()).await {
            Ok(reply) => {
                match reply.data {
                    // Full replacement from the adapter
                    Some(returned) => {
                        self.inner.store_value(from_stored(returned.clone()));
                        self.inner.bus.notify_root();
                        self.inner.touch();
                        self.inner.persist_save();
                        Ok(returned)
                    }
                    // The merge stands as the reconciled value
                    None => {
                        self.inner.touch();
                        self.inner.persist_save();
                        Ok(merged)
                    }
                }
            }
            Err(error) => {
                self.inner.store_value(previous.clone());
                self.inner.bus.notify(optimistic_paths);
                let meta = ErrorMeta::for_operation("patch")
                    .with_rollback(previous.unwrap_or(Value::Null));
                self.inner.report(&error, meta);
                Err(error)
            }
        }
    }

    /// Optimistic removal; on failure the previous value returns.
    pub async fn delete(
        &self,
        params: Params,
    ) -> Result<()> {
        let op = self.inner.ops.require_delete(&self.inner.store_id)?;

        let previous = self.inner.state.read().clone();
        self.inner.store_value(None);
        self.inner.cache.remove_prefix(&self.inner.store_prefix());
        self.inner.bus.notify_root();

        match op(params).await {
            Ok(_reply) => {
                self.inner.touch();
                self.inner.persist_save();
                Ok(())
            }
            Err(error) => {
                self.inner.store_value(previous.clone());
                self.inner.bus.notify_root();
                let meta = ErrorMeta::for_operation("delete")
                    .with_rollback(previous.unwrap_or(Value::Null));
                self.inner.report(&error, meta);
                Err(error)
            }
        }
    }

    /// Synchronous null-out: no adapter call, full notification.
    pub fn clear(&self) {
        self.inner.store_value(None);
        *self.inner.meta.lock() = None;
        self.inner.cache.remove_prefix(&self.inner.store_prefix());
        self.inner.bus.notify_root();
    }

    // ---- consumer surface -----------------------------------------------

    /// Current value snapshot; `None` is absent-or-unfetched (see
    /// [`status`](Self::status) to tell them apart).
    pub fn value(&self) -> Option<Value> {
        self.inner.state.read().clone()
    }

    pub fn meta(&self) -> Option<Value> {
        self.inner.meta.lock().clone()
    }

    /// The root observation handle over the held value.
    pub fn handle(&self) -> StateHandle {
        let weak = Arc::downgrade(&self.inner);
        let resolver: Resolver = Arc::new(move |path: &Path| {
            let inner = weak.upgrade()?;
            let state = inner.state.read();
            let root = state.as_ref()?;
            navigate(root, path).cloned()
        });
        StateHandle::new(resolver, self.inner.bus.clone())
    }

    pub fn subscribe(
        &self,
        path: Path,
        listener: impl Fn() + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.bus.subscribe(path, listener)
    }

    pub fn status(&self) -> StoreStatus {
        self.inner.monitor.status()
    }

    pub fn subscribe_to_status(
        &self,
        listener: impl Fn() + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.monitor.subscribe(listener)
    }

    /// Release the status monitor. Safe to call repeatedly.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.monitor.dispose();
        debug!(store = %self.inner.store_id, "store disposed");
    }
}

/// JSON null in storage ↔ `None` in the store's state.
fn from_stored(stored: Value) -> Option<Value> {
    match stored {
        Value::Null => None,
        present => Some(present),
    }
}
