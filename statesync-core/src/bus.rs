//! Path-indexed subscriber bus
//!
//! Routes change notifications from store mutations to subscribers whose
//! subscribed path *overlaps* a changed path (one is a prefix of the
//! other, equality included).
//!
//! Two structures coexist: a list of root subscriptions (path `[]`) and
//! a bucket map keyed by first segment for everything else. A non-root
//! change path only walks its own bucket; a root change walks every
//! bucket; this is accepted, since root changes rewrite the whole store
//! anyway.
//!
//! Listener invocation happens outside the registry lock, so listeners
//! may freely subscribe, unsubscribe and notify reentrantly. A listener
//! that panics is isolated and logged; the remaining listeners still
//! run. Within one `notify` call each matching subscriber fires at most
//! once, and a subscriber removed mid-cycle never fires again.

use std::collections::HashMap;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use tracing::error;
use tracing::trace;

use crate::path::Path;
use crate::path::Segment;

/// A registered change callback.
pub type Listener = Arc<dyn Fn() + Send + Sync>;

/// Hook fired exactly once, on the first-ever subscription.
pub type FirstSubscribeHook = Box<dyn FnOnce() + Send>;

struct BusEntry {
    id: u64,
    path: Path,
    listener: Listener,
    /// Cleared on unsubscribe so a removal mid-notify-cycle suppresses
    /// delivery even after the cycle snapshotted its listeners.
    alive: Arc<AtomicBool>,
}

#[derive(Default)]
struct BusState {
    root: Vec<BusEntry>,
    buckets: HashMap<Segment, Vec<BusEntry>>,
}

struct BusShared {
    state: Mutex<BusState>,
    next_id: AtomicU64,
    first_hook: Mutex<Option<FirstSubscribeHook>>,
}

/// Path-indexed fan-out of change notifications. Cheap to clone; clones
/// share one registry.
#[derive(Clone)]
pub struct SubscriberBus {
    shared: Arc<BusShared>,
}

impl Default for SubscriberBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriberBus {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(BusShared {
                state: Mutex::new(BusState::default()),
                next_id: AtomicU64::new(1),
                first_hook: Mutex::new(None),
            }),
        }
    }

    /// A bus whose `hook` fires exactly once, on the first subscription.
    pub fn with_first_subscribe(hook: impl FnOnce() + Send + 'static) -> Self {
        let bus = Self::new();
        *bus.shared.first_hook.lock() = Some(Box::new(hook));
        bus
    }

    /// Register `listener` at `path`. The returned [`Subscription`] is
    /// the unsubscribe token; dropping it also unsubscribes.
    pub fn subscribe(
        &self,
        path: Path,
        listener: impl Fn() + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let alive = Arc::new(AtomicBool::new(true));
        let entry = BusEntry {
            id,
            path: path.clone(),
            listener: Arc::new(listener),
            alive: alive.clone(),
        };

        let first = path.first().cloned();
        {
            let mut state = self.shared.state.lock();
            match &first {
                None => state.root.push(entry),
                Some(segment) => state.buckets.entry(segment.clone()).or_default().push(entry),
            }
        }
        trace!(subscription = id, %path, "subscribed");

        // Fire the first-subscribe hook outside the registry lock so it
        // may itself notify or subscribe.
        let hook = self.shared.first_hook.lock().take();
        if let Some(hook) = hook {
            hook();
        }

        Subscription {
            shared: Arc::downgrade(&self.shared),
            id,
            first,
            alive,
        }
    }

    /// Invoke every listener whose subscribed path overlaps any path in
    /// `changed`, each at most once.
    pub fn notify(
        &self,
        changed: &[Path],
    ) {
        if changed.is_empty() {
            return;
        }

        let snapshot = {
            let state = self.shared.state.lock();
            let mut seen: HashSet<u64> = HashSet::new();
            let mut matched: Vec<(u64, Listener, Arc<AtomicBool>)> = Vec::new();

            let mut collect = |entries: &[BusEntry], changed_path: &Path| {
                for entry in entries {
                    if entry.path.overlaps(changed_path) && seen.insert(entry.id) {
                        matched.push((entry.id, entry.listener.clone(), entry.alive.clone()));
                    }
                }
            };

            for changed_path in changed {
                // Root subscriptions overlap every change
                collect(&state.root, changed_path);
                match changed_path.first() {
                    // A root change walks every bucket
                    None => {
                        for entries in state.buckets.values() {
                            collect(entries, changed_path);
                        }
                    }
                    Some(segment) => {
                        if let Some(entries) = state.buckets.get(segment) {
                            collect(entries, changed_path);
                        }
                    }
                }
            }

            // Registration order, deterministic across identical calls
            matched.sort_by_key(|(id, _, _)| *id);
            matched
        };

        for (id, listener, alive) in snapshot {
            if !alive.load(Ordering::Acquire) {
                continue;
            }
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener())) {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                error!(subscription = id, message, "subscriber panicked during notify");
            }
        }
    }

    /// Convenience for the common whole-store notification.
    pub fn notify_root(&self) {
        self.notify(&[Path::root()]);
    }

    fn unsubscribe(
        shared: &Arc<BusShared>,
        id: u64,
        first: &Option<Segment>,
    ) {
        let mut state = shared.state.lock();
        match first {
            None => state.root.retain(|entry| entry.id != id),
            Some(segment) => {
                let empty = match state.buckets.get_mut(segment) {
                    None => false,
                    Some(entries) => {
                        entries.retain(|entry| entry.id != id);
                        entries.is_empty()
                    }
                };
                if empty {
                    state.buckets.remove(segment);
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        let state = self.shared.state.lock();
        state.root.len() + state.buckets.values().map(Vec::len).sum::<usize>()
    }
}

/// Unsubscribe token returned by [`SubscriberBus::subscribe`].
///
/// Removal happens on [`unsubscribe`](Subscription::unsubscribe) or on
/// drop, is idempotent, and takes effect immediately: the listener is
/// never invoked afterwards, even for a notify cycle already in flight.
pub struct Subscription {
    shared: Weak<BusShared>,
    id: u64,
    first: Option<Segment>,
    alive: Arc<AtomicBool>,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(shared) = self.shared.upgrade() {
            SubscriberBus::unsubscribe(&shared, self.id, &self.first);
            trace!(subscription = self.id, "unsubscribed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
