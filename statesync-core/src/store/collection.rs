//! Keyed, ordered collection store
//!
//! Holds `id → record` plus an insertion-ordered id list (kept
//! consistent at all times), serves reactive reads at collection-,
//! record- and field-granularity, and orchestrates optimistic mutations
//! against the configured adapters.
//!
//! Concurrency: mutations to different records are independent (each
//! captures its own rollback snapshot); mutations to the same record are
//! permitted but not serialized: the last adapter result wins, and each
//! rollback restores the state captured at its own optimistic moment.
//! Callers that need serialization route their adapter through the
//! shared request queue.
//!
//! Push events rewrite in-memory state directly: no cache writes, no
//! optimistic machinery. A push arriving while a patch is in flight
//! overwrites the optimistic record, and the later adapter
//! reconciliation overwrites again (push-wins, then last-writer-wins);
//! subscribers are notified at every step, so the final state is always
//! published.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use arc_swap::ArcSwap;
use futures::FutureExt;
use parking_lot::Mutex;
use parking_lot::RwLock;
use serde_json::Map;
use serde_json::Value;
use tracing::debug;
use tracing::warn;

use super::Inflight;
use super::normalize_record;
use super::report_error;
use super::shallow_merge;
use crate::adapter::AdapterOps;
use crate::adapter::push::PushBatch;
use crate::adapter::push::PushBinding;
use crate::adapter::push::PushHooks;
use crate::adapter::push::PushMode;
use crate::bus::SubscriberBus;
use crate::bus::Subscription;
use crate::cache::StoreCache;
use crate::config::EngineConfig;
use crate::context::SyncContext;
use crate::errors::ConfigError;
use crate::errors::ErrorHook;
use crate::errors::ErrorMeta;
use crate::errors::NotFoundError;
use crate::errors::Result;
use crate::handle::Resolver;
use crate::handle::StateHandle;
use crate::handle::navigate;
use crate::params::Params;
use crate::path::Path;
use crate::path::Segment;
use crate::status::ConnectionStatus;
use crate::status::MonitorOptions;
use crate::status::StatusMonitor;
use crate::status::StatusPatch;
use crate::status::StoreStatus;
use crate::utils::now_millis;
use crate::utils::record_id;

/// Default list cache time-to-live.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// The collection's in-memory shape: a record map and the insertion
/// order of its ids. Every id in `order` has exactly one entry in
/// `items` and vice versa.
#[derive(Debug, Default)]
pub(crate) struct CollectionState {
    pub(crate) items: HashMap<String, Value>,
    pub(crate) order: Vec<String>,
}

impl CollectionState {
    /// Replace a record in place, or append a new id.
    /// Returns the id and whether it was newly inserted.
    fn upsert(
        &mut self,
        mut record: Value,
    ) -> Option<(String, bool)> {
        let id = normalize_record(&mut record)?;
        let is_new = self.items.insert(id.clone(), record).is_none();
        if is_new {
            self.order.push(id.clone());
        }
        Some((id, is_new))
    }

    fn replace_all(
        &mut self,
        records: Vec<Value>,
    ) {
        self.items.clear();
        self.order.clear();
        for record in records {
            if self.upsert(record).is_none() {
                warn!("dropping record without id");
            }
        }
    }

    fn remove(
        &mut self,
        id: &str,
    ) -> Option<(Value, usize)> {
        let record = self.items.remove(id)?;
        let index = self.order.iter().position(|x| x == id)?;
        self.order.remove(index);
        Some((record, index))
    }

    fn reinsert(
        &mut self,
        id: String,
        record: Value,
        index: usize,
    ) {
        let index = index.min(self.order.len());
        self.items.insert(id.clone(), record);
        self.order.insert(index, id);
    }

    fn records(&self) -> Vec<Value> {
        self.order
            .iter()
            .filter_map(|id| self.items.get(id))
            .cloned()
            .collect()
    }

    fn snapshot(&self) -> Value {
        let mut object = Map::new();
        for id in &self.order {
            if let Some(record) = self.items.get(id) {
                object.insert(id.clone(), record.clone());
            }
        }
        Value::Object(object)
    }

    /// Integrate one push batch. Returns the changed paths to notify
    /// (empty when the batch was a no-op).
    pub(crate) fn apply_push(
        &mut self,
        batch: PushBatch,
    ) -> Vec<Path> {
        let PushBatch {
            mode,
            dedupe_key,
            max_items,
            items,
        } = batch;

        match mode {
            PushMode::Replace => {
                self.replace_all(items);
                vec![Path::root()]
            }
            PushMode::Append => {
                let key_of = |record: &Value| -> Option<String> {
                    match &dedupe_key {
                        Some(extract) => extract(record),
                        None => record_id(record),
                    }
                };
                let mut seen: HashSet<String> = self
                    .order
                    .iter()
                    .filter_map(|id| self.items.get(id))
                    .filter_map(&key_of)
                    .collect();

                let mut changed = false;
                for item in items {
                    let Some(key) = key_of(&item) else {
                        warn!("dropping push item without dedupe key");
                        continue;
                    };
                    if !seen.insert(key) {
                        continue;
                    }
                    if self.upsert(item).is_some() {
                        changed = true;
                    }
                }

                if let Some(bound) = max_items {
                    // Keep the tail: newest entries win
                    while self.order.len() > bound {
                        let oldest = self.order.remove(0);
                        self.items.remove(&oldest);
                        changed = true;
                    }
                }

                if changed { vec![Path::root()] } else { Vec::new() }
            }
            PushMode::Upsert => {
                let mut touched: Vec<Path> = Vec::new();
                let mut appended = false;
                for item in items {
                    match self.upsert(item) {
                        None => warn!("dropping push item without id"),
                        Some((_, true)) => appended = true,
                        Some((id, false)) => {
                            touched.push(Path::new([Segment::from(id.as_str())]));
                        }
                    }
                }
                if appended {
                    // A new id changes the order; the root path covers
                    // every per-record update too
                    vec![Path::root()]
                } else {
                    touched
                }
            }
        }
    }
}

struct CollectionInner {
    store_id: String,
    state: RwLock<CollectionState>,
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
    push_binding: Mutex<Option<PushBinding>>,
    disposed: AtomicBool,
}

impl CollectionInner {
    fn list_cache_key(
        &self,
        params: &Params,
    ) -> String {
        format!("{}:list:{}", self.store_id, params.stable_key())
    }

    fn item_cache_key(
        &self,
        id: &str,
        params: &Params,
    ) -> String {
        format!("{}:one:{}:{}", self.store_id, id, params.stable_key())
    }

    fn item_cache_prefix(
        &self,
        id: &str,
    ) -> String {
        format!("{}:one:{}:", self.store_id, id)
    }

    fn store_prefix(&self) -> String {
        format!("{}:", self.store_id)
    }

    fn list_prefix(&self) -> String {
        format!("{}:list:", self.store_id)
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

    /// Mirror the ordered records into durable storage; a rejected
    /// write is logged and memory stays authoritative.
    fn persist_save(&self) {
        if let Some(persist) = &self.ops.persist {
            let snapshot = Value::Array(self.state.read().records());
            if let Err(quota) = (persist.save)(&snapshot) {
                warn!(%quota, "durable mirror write failed, memory state stays authoritative");
            }
        }
    }
}

/// Reactive store for a keyed, insertion-ordered set of records.
#[derive(Clone)]
pub struct CollectionStore {
    inner: Arc<CollectionInner>,
}

/// Builder for [`CollectionStore`].
pub struct CollectionStoreBuilder {
    ctx: SyncContext,
    store_id: String,
    ops: AdapterOps,
    cache_ttl: Duration,
    monitor: MonitorOptions,
    on_error: Option<ErrorHook>,
}

impl CollectionStore {
    pub fn builder(
        ctx: &SyncContext,
        store_id: impl Into<String>,
    ) -> CollectionStoreBuilder {
        CollectionStoreBuilder {
            ctx: ctx.clone(),
            store_id: store_id.into(),
            ops: AdapterOps::default(),
            cache_ttl: DEFAULT_CACHE_TTL,
            monitor: MonitorOptions::default(),
            on_error: None,
        }
    }
}

impl CollectionStoreBuilder {
    /// Lay another adapter over the current composition (spread
    /// semantics: the later adapter wins per operation).
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

    /// Per-store error hook; runs before the global hook.
    pub fn on_error(
        mut self,
        hook: ErrorHook,
    ) -> Self {
        self.on_error = Some(hook);
        self
    }

    /// Build the store: spawn its status monitor, warm-start from
    /// durable state, and open the push stream when configured.
    ///
    /// Must run inside a tokio runtime.
    pub fn build(self) -> CollectionStore {
        let inner = Arc::new_cyclic(|weak: &Weak<CollectionInner>| {
            let reload_weak = weak.clone();
            let reload = Arc::new(move || {
                if let Some(inner) = reload_weak.upgrade() {
                    let store = CollectionStore { inner };
                    let params = store.inner.last_params.lock().clone();
                    tokio::spawn(async move {
                        // Reload bypasses the cache; failures land in
                        // status.error like any other get
                        let _ = store.get(params.with(crate::params::FORCE_PARAM, true)).await;
                    });
                }
            });

            CollectionInner {
                store_id: self.store_id,
                state: RwLock::new(CollectionState::default()),
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
                push_binding: Mutex::new(None),
                disposed: AtomicBool::new(false),
            }
        });

        // Warm-start from the durable mirror, before anyone subscribes
        if let Some(persist) = &inner.ops.persist {
            if let Some(Value::Array(records)) = (persist.load)() {
                debug!(store = %inner.store_id, count = records.len(), "warm start");
                inner.state.write().replace_all(records);
            }
        }

        let store = CollectionStore { inner };
        store.start_push();
        store
    }
}

impl CollectionStore {
    fn start_push(&self) {
        let Some(stream) = self.inner.ops.stream.clone() else {
            return;
        };

        let apply_weak = Arc::downgrade(&self.inner);
        let apply = Arc::new(move |batch: PushBatch| {
            if let Some(inner) = apply_weak.upgrade() {
                let changed = inner.state.write().apply_push(batch);
                if !changed.is_empty() {
                    inner.touch();
                    inner.bus.notify(&changed);
                }
            }
        });

        let status_weak = Arc::downgrade(&self.inner);
        let status = Arc::new(move |connection: ConnectionStatus, error: Option<String>| {
            if let Some(inner) = status_weak.upgrade() {
                let mut patch = StatusPatch::new().connection(connection);
                if let Some(message) = error {
                    patch = patch.error(Some(message));
                }
                inner.monitor.set_status(patch);
            }
        });

        let binding = stream(PushHooks { apply, status });
        *self.inner.push_binding.lock() = Some(binding);
    }

    // ---- reads ----------------------------------------------------------

    /// Fetch the whole list.
    ///
    /// Cache first (a stale hit resolves immediately and refreshes in
    /// the background); concurrent calls with equal parameters share
    /// one transport request. `_force` bypasses the cache and is
    /// stripped here, before keys or URLs are built.
    pub async fn get(
        &self,
        params: Params,
    ) -> Result<Vec<Value>> {
        let mut params = params;
        let force = params.take_force();
        *self.inner.last_params.lock() = params.clone();

        let cache_key = self.inner.list_cache_key(&params);
        if !force {
            if let Some(hit) = self.inner.cache.get(&cache_key, self.inner.cache_ttl) {
                if hit.stale {
                    self.inner
                        .monitor
                        .set_status(StatusPatch::new().revalidating(true));
                    let refresh = self.list_fetch(params, cache_key);
                    tokio::spawn(async move {
                        let _ = refresh.await;
                    });
                }
                return Ok(as_records(hit.data));
            }
        }

        let initial = self.inner.monitor.status().last_updated == 0;
        self.inner.monitor.set_status(if initial {
            StatusPatch::new().loading(true)
        } else {
            StatusPatch::new().revalidating(true)
        });

        self.list_fetch(params, cache_key).await.map(as_records)
    }

    /// The deduplicated list fetch: one transport call per stable
    /// parameter set, state updated exactly once per real fetch.
    fn list_fetch(
        &self,
        params: Params,
        cache_key: String,
    ) -> super::SharedFetch {
        let inner = self.inner.clone();
        let dedup_key = cache_key.clone();
        self.inner.inflight.join_or_insert(&cache_key, move || {
            async move {
                let outcome = Self::fetch_list(&inner, params, dedup_key.clone()).await;
                inner.inflight.remove(&dedup_key);
                outcome
            }
            .boxed()
            .shared()
        })
    }

    async fn fetch_list(
        inner: &Arc<CollectionInner>,
        params: Params,
        cache_key: String,
    ) -> std::result::Result<Value, crate::errors::Error> {
        let op = inner.ops.require_get(&inner.store_id)?;
        match op(params.clone()).await {
            Ok(reply) => {
                let incoming = match reply.data {
                    Some(Value::Array(records)) => records,
                    Some(single) => vec![single],
                    None => Vec::new(),
                };
                let normalized = {
                    let mut state = inner.state.write();
                    state.replace_all(incoming);
                    state.records()
                };
                *inner.meta.lock() = reply.meta;

                let list = Value::Array(normalized);
                inner.cache.set(cache_key, list.clone());
                inner.monitor.set_status(
                    StatusPatch::new()
                        .loading(false)
                        .revalidating(false)
                        .error(None)
                        .last_updated(now_millis()),
                );
                inner.bus.notify_root();
                Ok(list)
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

    /// Fetch one record and merge it into the collection: an existing
    /// id is updated in place (order preserved), a new id is appended.
    pub async fn get_one(
        &self,
        params: Params,
    ) -> Result<Value> {
        let mut params = params;
        let force = params.take_force();

        let id_hint = params.id_value().unwrap_or_else(|| "-".to_string());
        let cache_key = self.inner.item_cache_key(&id_hint, &params);

        if !force {
            if let Some(hit) = self.inner.cache.get(&cache_key, self.inner.cache_ttl) {
                if hit.stale {
                    self.inner
                        .monitor
                        .set_status(StatusPatch::new().revalidating(true));
                    let refresh = self.one_fetch(params, cache_key);
                    tokio::spawn(async move {
                        let _ = refresh.await;
                    });
                }
                return Ok(hit.data);
            }
        }

        self.one_fetch(params, cache_key).await
    }

    fn one_fetch(
        &self,
        params: Params,
        cache_key: String,
    ) -> super::SharedFetch {
        let inner = self.inner.clone();
        let dedup_key = cache_key.clone();
        self.inner.inflight.join_or_insert(&cache_key, move || {
            async move {
                let outcome = Self::fetch_one(&inner, params, dedup_key.clone()).await;
                inner.inflight.remove(&dedup_key);
                outcome
            }
            .boxed()
            .shared()
        })
    }

    async fn fetch_one(
        inner: &Arc<CollectionInner>,
        params: Params,
        cache_key: String,
    ) -> std::result::Result<Value, crate::errors::Error> {
        let op = inner.ops.require_get_one(&inner.store_id)?;
        match op(params.clone()).await {
            Ok(reply) => {
                let Some(record) = reply.data else {
                    return Ok(Value::Null);
                };
                let (record, changed) = {
                    let mut state = inner.state.write();
                    match state.upsert(record.clone()) {
                        None => (record, Vec::new()),
                        Some((id, true)) => {
                            let stored = state.items[&id].clone();
                            (stored, vec![Path::root()])
                        }
                        Some((id, false)) => {
                            let stored = state.items[&id].clone();
                            (stored, vec![Path::new([Segment::from(id.as_str())])])
                        }
                    }
                };
                inner.cache.set(cache_key, record.clone());
                inner.monitor.set_status(
                    StatusPatch::new().error(None).last_updated(now_millis()),
                );
                if !changed.is_empty() {
                    inner.bus.notify(&changed);
                }
                Ok(record)
            }
            Err(error) => {
                inner
                    .monitor
                    .set_status(StatusPatch::new().error(Some(error.to_string())));
                let meta = ErrorMeta::for_operation("get_one").with_params(params);
                inner.report(&error, meta);
                Err(error)
            }
        }
    }

    // ---- mutations ------------------------------------------------------

    /// Create a record. Never optimistic: the server assigns identity,
    /// so nothing is published until the adapter confirms.
    pub async fn create(
        &self,
        data: Value,
    ) -> Result<Value> {
        let op = self.inner.ops.require_create(&self.inner.store_id)?;
        match op(data.clone()).await {
            Ok(reply) => {
                let mut record = reply.data.unwrap_or(data);
                if normalize_record(&mut record).is_none() {
                    warn!(store = %self.inner.store_id, "created record has no id");
                }
                {
                    let mut state = self.inner.state.write();
                    let _ = state.upsert(record.clone());
                }
                // A new record invalidates every cached list
                self.inner.cache.remove_prefix(&self.inner.list_prefix());
                self.inner.touch();
                self.inner.bus.notify_root();
                self.inner.persist_save();
                Ok(record)
            }
            Err(error) => {
                let meta = ErrorMeta::for_operation("create");
                self.inner.report(&error, meta);
                Err(error)
            }
        }
    }

    /// Partially update the record addressed by `partial.id`.
    ///
    /// The merge is applied and published immediately; on adapter
    /// failure the captured pre-mutation record is restored
    /// byte-for-byte, subscribers are re-notified, and the error is
    /// re-raised after the hooks ran.
    pub async fn patch(
        &self,
        partial: Value,
    ) -> Result<Value> {
        let op = self.inner.ops.require_patch(&self.inner.store_id)?;
        let id = record_id(&partial).ok_or(ConfigError::MissingId {
            store_id: self.inner.store_id.clone(),
            operation: "patch",
        })?;

        // 1. Capture; an absent id fails with no state change
        let previous = {
            let state = self.inner.state.read();
            state.items.get(&id).cloned().ok_or_else(|| NotFoundError {
                store_id: self.inner.store_id.clone(),
                id: id.clone(),
            })?
        };

        // 2. Merge locally and publish
        let merged = shallow_merge(&previous, &partial);
        {
            let mut state = self.inner.state.write();
            state.items.insert(id.clone(), merged.clone());
        }

        // 3. The cached single record is now outdated
        self.inner.cache.remove_prefix(&self.inner.item_cache_prefix(&id));

        // 4. Notify precisely: one path per touched field
        let id_segment = Segment::from(id.as_str());
        let field_paths: Vec<Path> = match &partial {
            Value::Object(changes) => changes
                .keys()
                .filter(|key| key.as_str() != "id")
                .map(|key| Path::new([id_segment.clone(), Segment::from(key.as_str())]))
                .collect(),
            _ => Vec::new(),
        };
        let record_path = vec![Path::new([id_segment.clone()])];
        self.inner.bus.notify(if field_paths.is_empty() {
            &record_path
        } else {
            &field_paths
        });

        // 5. Await the adapter
        match op(Params::id(&id), partial.clone()).await {
            // 6. Reconcile from the returned record
            Ok(reply) => {
                let reconciled = match reply.data {
                    None => merged,
                    Some(mut returned) => {
                        normalize_record(&mut returned);
                        returned
                    }
                };
                {
                    let mut state = self.inner.state.write();
                    state.items.insert(id.clone(), reconciled.clone());
                }
                self.inner.touch();
                self.inner.bus.notify(&record_path);
                self.inner.persist_save();
                Ok(reconciled)
            }
            // 7. Restore the captured record and re-raise
            Err(error) => {
                {
                    let mut state = self.inner.state.write();
                    state.items.insert(id.clone(), previous.clone());
                }
                self.inner.bus.notify(&record_path);
                let meta = ErrorMeta::for_operation("patch")
                    .with_params(Params::id(&id))
                    .with_rollback(previous);
                self.inner.report(&error, meta);
                Err(error)
            }
        }
    }

    /// Fully replace the record addressed by `record.id` (the PUT
    /// counterpart of [`patch`](Self::patch)).
    pub async fn update(
        &self,
        record: Value,
    ) -> Result<Value> {
        let op = self.inner.ops.require_set(&self.inner.store_id)?;
        let mut record = record;
        let id = normalize_record(&mut record).ok_or(ConfigError::MissingId {
            store_id: self.inner.store_id.clone(),
            operation: "update",
        })?;

        let previous = {
            let state = self.inner.state.read();
            state.items.get(&id).cloned().ok_or_else(|| NotFoundError {
                store_id: self.inner.store_id.clone(),
                id: id.clone(),
            })?
        };

        {
            let mut state = self.inner.state.write();
            state.items.insert(id.clone(), record.clone());
        }
        self.inner.cache.remove_prefix(&self.inner.item_cache_prefix(&id));

        let record_path = vec![Path::new([Segment::from(id.as_str())])];
        self.inner.bus.notify(&record_path);

        match op(Params::id(&id), record.clone()).await {
            Ok(reply) => {
                let reconciled = match reply.data {
                    None => record,
                    Some(mut returned) => {
                        normalize_record(&mut returned);
                        returned
                    }
                };
                {
                    let mut state = self.inner.state.write();
                    state.items.insert(id.clone(), reconciled.clone());
                }
                self.inner.touch();
                self.inner.bus.notify(&record_path);
                self.inner.persist_save();
                Ok(reconciled)
            }
            Err(error) => {
                {
                    let mut state = self.inner.state.write();
                    state.items.insert(id.clone(), previous.clone());
                }
                self.inner.bus.notify(&record_path);
                let meta = ErrorMeta::for_operation("update")
                    .with_params(Params::id(&id))
                    .with_rollback(previous);
                self.inner.report(&error, meta);
                Err(error)
            }
        }
    }

    /// Remove the record addressed by `params.id`.
    ///
    /// The removal is order-sensitive: on failure the record returns to
    /// its captured list position.
    pub async fn delete(
        &self,
        params: Params,
    ) -> Result<()> {
        let op = self.inner.ops.require_delete(&self.inner.store_id)?;
        let id = params.id_value().ok_or(ConfigError::MissingId {
            store_id: self.inner.store_id.clone(),
            operation: "delete",
        })?;

        // 1. Capture record and position; absent is a no-op failure
        let (previous, index) = {
            let mut state = self.inner.state.write();
            state.remove(&id).ok_or_else(|| NotFoundError {
                store_id: self.inner.store_id.clone(),
                id: id.clone(),
            })?
        };

        // 2. Every cache entry of this store may reference the record
        self.inner.cache.remove_prefix(&self.inner.store_prefix());
        self.inner.bus.notify_root();

        // 3. Await the adapter
        match op(params).await {
            Ok(_reply) => {
                self.inner.touch();
                self.inner.persist_save();
                Ok(())
            }
            Err(error) => {
                // 4. Reinsert at the captured index
                {
                    let mut state = self.inner.state.write();
                    state.reinsert(id.clone(), previous.clone(), index);
                }
                self.inner.bus.notify_root();
                let meta = ErrorMeta::for_operation("delete")
                    .with_params(Params::id(&id))
                    .with_rollback(previous);
                self.inner.report(&error, meta);
                Err(error)
            }
        }
    }

    /// Drop everything synchronously: state, response metadata and
    /// every cache entry of this store.
    pub fn clear(&self) {
        {
            let mut state = self.inner.state.write();
            state.items.clear();
            state.order.clear();
        }
        *self.inner.meta.lock() = None;
        self.inner.cache.remove_prefix(&self.inner.store_prefix());
        self.inner.bus.notify_root();
    }

    // ---- consumer surface -----------------------------------------------

    /// Snapshot of the collection as an `id → record` object. Reference
    /// equality is not preserved across mutations.
    pub fn value(&self) -> Value {
        self.inner.state.read().snapshot()
    }

    /// Ordered record snapshot.
    pub fn records(&self) -> Vec<Value> {
        self.inner.state.read().records()
    }

    /// Ids in insertion order.
    pub fn ids(&self) -> Vec<String> {
        self.inner.state.read().order.clone()
    }

    /// One record by id (normalized string form).
    pub fn record(
        &self,
        id: &str,
    ) -> Option<Value> {
        self.inner.state.read().items.get(id).cloned()
    }

    /// Response metadata of the last list fetch (envelope siblings).
    pub fn meta(&self) -> Option<Value> {
        self.inner.meta.lock().clone()
    }

    /// The root observation handle. The first path segment is an id
    /// lookup; deeper segments navigate into the record.
    pub fn handle(&self) -> StateHandle {
        let weak = Arc::downgrade(&self.inner);
        let resolver: Resolver = Arc::new(move |path: &Path| {
            let inner = weak.upgrade()?;
            let state = inner.state.read();
            match path.segments().split_first() {
                None => Some(state.snapshot()),
                Some((first, rest)) => {
                    let record = state.items.get(&first.as_id())?;
                    navigate(record, &Path::new(rest.to_vec())).cloned()
                }
            }
        });

        let order_weak = Arc::downgrade(&self.inner);
        let order = Arc::new(move || match order_weak.upgrade() {
            Some(inner) => inner.state.read().order.clone(),
            None => Vec::new(),
        });

        StateHandle::new(resolver, self.inner.bus.clone()).with_order(order)
    }

    /// Subscribe to data changes at `path` (root overlaps everything).
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

    /// Subscribe to status changes only; data mutations do not fire
    /// these listeners.
    pub fn subscribe_to_status(
        &self,
        listener: impl Fn() + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.monitor.subscribe(listener)
    }

    /// Release the status monitor and the push connection. In-memory
    /// state stays readable; safe to call repeatedly.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.monitor.dispose();
        if let Some(binding) = self.inner.push_binding.lock().take() {
            binding.dispose();
        }
        debug!(store = %self.inner.store_id, "store disposed");
    }
}

fn as_records(list: Value) -> Vec<Value> {
    match list {
        Value::Array(records) => records,
        other => vec![other],
    }
}
