//! Shared LRU cache with a staleness signal
//!
//! One [`StoreCache`] instance is shared by every store in a
//! [`SyncContext`]; keys are namespaced by a per-store prefix. The cache
//! is intentionally blind to entity identity: it moves opaque payloads,
//! and the store coordinators encode their parameters into keys.
//!
//! An entry younger than `ttl/2` is fresh; between `ttl/2` and `ttl` it
//! is *stale-but-usable* (returned with `stale = true`, which the stores
//! turn into a background revalidation); past `ttl` it is evicted on
//! access.
//!
//! Timestamps come from `tokio::time::Instant`, so paused-clock tests
//! drive expiry deterministically.
//!
//! [`SyncContext`]: crate::context::SyncContext

use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;
use tracing::trace;

/// Default maximum number of entries.
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// A cache read: the payload plus whether it has entered the
/// stale-while-revalidate window.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub data: Value,
    pub stale: bool,
}

#[derive(Debug)]
struct CacheEntry {
    data: Value,
    stored_at: Instant,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    /// LRU order, least-recently-used at the front.
    order: VecDeque<String>,
}

impl CacheState {
    fn touch(
        &mut self,
        key: &str,
    ) {
        if let Some(position) = self.order.iter().position(|k| k == key) {
            self.order.remove(position);
        }
        self.order.push_back(key.to_string());
    }

    fn forget(
        &mut self,
        key: &str,
    ) {
        self.entries.remove(key);
        if let Some(position) = self.order.iter().position(|k| k == key) {
            self.order.remove(position);
        }
    }
}

/// Time-bounded LRU cache keyed by string.
pub struct StoreCache {
    state: Mutex<CacheState>,
    capacity: usize,
}

impl Default for StoreCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl StoreCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            capacity: capacity.max(1),
        }
    }

    /// Look up `key` under the given time-to-live.
    ///
    /// Returns `None` when absent or expired (expired entries are
    /// evicted on the spot). A hit is promoted to most-recently-used and
    /// flagged stale once its age passes `ttl/2`.
    pub fn get(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Option<CacheHit> {
        let mut state = self.state.lock();

        let age = match state.entries.get(key) {
            None => return None,
            Some(entry) => entry.stored_at.elapsed(),
        };

        if age >= ttl {
            trace!(key, ?age, "cache entry expired");
            state.forget(key);
            return None;
        }

        state.touch(key);
        let entry = state.entries.get(key).expect("touched entry is present");
        Some(CacheHit {
            data: entry.data.clone(),
            stale: age > ttl / 2,
        })
    }

    /// Insert or refresh an entry. At capacity the least-recently-used
    /// entry is evicted first.
    pub fn set(
        &self,
        key: impl Into<String>,
        data: Value,
    ) {
        let key = key.into();
        let mut state = self.state.lock();

        if !state.entries.contains_key(&key) && state.entries.len() >= self.capacity {
            if let Some(evicted) = state.order.pop_front() {
                trace!(key = %evicted, "cache capacity eviction");
                state.entries.remove(&evicted);
            }
        }

        state.entries.insert(
            key.clone(),
            CacheEntry {
                data,
                stored_at: Instant::now(),
            },
        );
        state.touch(&key);
    }

    /// Remove one entry.
    pub fn remove(
        &self,
        key: &str,
    ) {
        self.state.lock().forget(key);
    }

    /// Remove every entry whose key begins with `prefix`. Used for
    /// cross-key invalidation after a write.
    pub fn remove_prefix(
        &self,
        prefix: &str,
    ) {
        let mut state = self.state.lock();
        let doomed: Vec<String> = state
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for key in doomed {
            state.forget(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }
}
