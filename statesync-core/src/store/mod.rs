//! Store coordinators
//!
//! The coordinators tie the lower layers together for one entity
//! ([`single::SingleStore`]) or one keyed collection
//! ([`collection::CollectionStore`]): cache consultation with
//! stale-while-revalidate, in-flight request deduplication, optimistic
//! mutation with precise rollback, subscriber notification and adapter
//! orchestration.
//!
//! The optimistic pattern is an explicit capture/apply/reconcile-or-
//! restore sequence rather than a bare try/catch: the rollback re-fires
//! notifications and survives re-entrant mutation, because it writes
//! back the exact captured snapshot regardless of what happened in
//! between (documented last-writer-wins).

pub mod collection;
pub mod single;


use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::future::Shared;
use serde_json::Value;

use crate::errors::Error;
use crate::errors::ErrorHook;
use crate::errors::ErrorMeta;
use crate::utils::record_id;

/// One in-flight fetch, shareable by every concurrent caller with the
/// same stable parameters. `Error` is `Clone`, so a single failure fans
/// out to all waiters.
pub(crate) type SharedFetch = Shared<BoxFuture<'static, std::result::Result<Value, Error>>>;

/// The dedup registry: stable cache key → in-flight fetch.
#[derive(Default)]
pub(crate) struct Inflight {
    map: DashMap<String, SharedFetch>,
}

impl Inflight {
    /// Join the existing fetch for `key`, or install `make()`'s.
    pub(crate) fn join_or_insert(
        &self,
        key: &str,
        make: impl FnOnce() -> SharedFetch,
    ) -> SharedFetch {
        self.map
            .entry(key.to_string())
            .or_insert_with(make)
            .clone()
    }

    pub(crate) fn remove(
        &self,
        key: &str,
    ) {
        self.map.remove(key);
    }
}

/// Run the per-store hook, then the global hook, with identical
/// arguments.
pub(crate) fn report_error(
    store_hook: &Option<ErrorHook>,
    global_hook: &Option<ErrorHook>,
    error: &Error,
    meta: &ErrorMeta,
) {
    if let Some(hook) = store_hook {
        hook(error, meta);
    }
    if let Some(hook) = global_hook {
        hook(error, meta);
    }
}

/// Shallow-merge `changes` over `base` (top-level keys). Non-object
/// inputs fall back to replacement.
pub(crate) fn shallow_merge(
    base: &Value,
    changes: &Value,
) -> Value {
    match (base, changes) {
        (Value::Object(base), Value::Object(changes)) => {
            let mut merged = base.clone();
            for (key, value) in changes {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => changes.clone(),
    }
}

/// Normalize a record's id to its string form in place; returns the id.
pub(crate) fn normalize_record(record: &mut Value) -> Option<String> {
    let id = record_id(record)?;
    if let Value::Object(map) = record {
        map.insert("id".to_string(), Value::String(id.clone()));
    }
    Some(id)
}
