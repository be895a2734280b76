//! Lazy path-tracking views over live store state
//!
//! A [`StateHandle`] is the engine's observation proxy: each property
//! traversal extends a path vector and yields a fresh handle bound to
//! that path. Handles hold no data: reading one navigates from the
//! store root *at read time*, so a handle never goes stale after a
//! mutation and cyclic references cannot arise.
//!
//! The handle type itself is the identity marker that distinguishes
//! observed views from plain values; external code detects handles by
//! type, never by structure.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::bus::SubscriberBus;
use crate::bus::Subscription;
use crate::path::Path;
use crate::path::Segment;

/// Navigates from the live store root down a path. Returns `None` for
/// holes (segments that do not currently exist).
pub type Resolver = Arc<dyn Fn(&Path) -> Option<Value> + Send + Sync>;

/// Produces the collection's ids in insertion order. Present only on
/// handles rooted at a collection store.
pub type OrderFn = Arc<dyn Fn() -> Vec<String> + Send + Sync>;

/// A live, typed view of one location in the state tree.
///
/// `root.key("a").index(3).key("name")` observes path `$.a.3.name`.
#[derive(Clone)]
pub struct StateHandle {
    resolver: Resolver,
    order: Option<OrderFn>,
    bus: SubscriberBus,
    path: Path,
}

impl StateHandle {
    pub(crate) fn new(
        resolver: Resolver,
        bus: SubscriberBus,
    ) -> Self {
        Self {
            resolver,
            order: None,
            bus,
            path: Path::root(),
        }
    }

    pub(crate) fn with_order(
        mut self,
        order: OrderFn,
    ) -> Self {
        self.order = Some(order);
        self
    }

    /// The path this handle observes.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Child handle one segment deeper. String segments go through
    /// numeric coercion, so `at("3")` and `at(3u64)` observe the same
    /// location.
    pub fn at(
        &self,
        segment: impl Into<Segment>,
    ) -> StateHandle {
        StateHandle {
            resolver: self.resolver.clone(),
            order: None,
            bus: self.bus.clone(),
            path: self.path.child(segment),
        }
    }

    /// Keyed child access.
    pub fn key(
        &self,
        key: &str,
    ) -> StateHandle {
        self.at(key)
    }

    /// Indexed child access.
    pub fn index(
        &self,
        index: u64,
    ) -> StateHandle {
        self.at(index)
    }

    /// Child handle several segments deeper.
    pub fn at_path(
        &self,
        rest: &Path,
    ) -> StateHandle {
        StateHandle {
            resolver: self.resolver.clone(),
            order: None,
            bus: self.bus.clone(),
            path: self.path.join(rest),
        }
    }

    /// Resolve the current value by navigating fresh from the store
    /// root. A hole reads as `None`, but the handle's subscription still
    /// fires when the segment materializes.
    pub fn value(&self) -> Option<Value> {
        (self.resolver)(&self.path)
    }

    pub fn is_present(&self) -> bool {
        self.value().is_some()
    }

    pub fn as_str(&self) -> Option<String> {
        match self.value()? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.value()?.as_i64()
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.value()?.as_u64()
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.value()?.as_f64()
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.value()?.as_bool()
    }

    /// Register a listener at this handle's path.
    pub fn subscribe(
        &self,
        listener: impl Fn() + Send + Sync + 'static,
    ) -> Subscription {
        self.bus.subscribe(self.path.clone(), listener)
    }

    /// Iterate the children of this location as `(id, handle)` pairs.
    ///
    /// On a collection-store root the ids come in insertion order. On a
    /// plain object the keys come in the value's own order; on an array,
    /// indices in position order. Anything else yields nothing.
    pub fn iter(&self) -> Vec<(String, StateHandle)> {
        if self.path.is_root() {
            if let Some(order) = &self.order {
                return order()
                    .into_iter()
                    .map(|id| {
                        let handle = self.key(&id);
                        (id, handle)
                    })
                    .collect();
            }
        }

        match self.value() {
            Some(Value::Object(map)) => map
                .keys()
                .map(|k| (k.clone(), self.key(k)))
                .collect(),
            Some(Value::Array(items)) => (0..items.len() as u64)
                .map(|i| (i.to_string(), self.index(i)))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Snapshot of the child values, in [`iter`](Self::iter) order.
    ///
    /// Data-hungry combinators (filter, map, find, reduce) belong on
    /// this snapshot; they do not produce handles. Callers wanting
    /// observed results must index from the handle instead.
    pub fn records(&self) -> Vec<Value> {
        self.iter()
            .into_iter()
            .filter_map(|(_, handle)| handle.value())
            .collect()
    }
}

/// Renders the resolved leaf the way the host's default conversion
/// would: bare strings without quotes, numbers and booleans in decimal
/// form, `null` for JSON null, and the empty string for a hole.
impl fmt::Display for StateHandle {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self.value() {
            None => Ok(()),
            Some(Value::String(s)) => write!(f, "{s}"),
            Some(other) => write!(f, "{other}"),
        }
    }
}

impl fmt::Debug for StateHandle {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("StateHandle")
            .field("path", &self.path.to_string())
            .field("value", &self.value())
            .finish()
    }
}

impl PartialEq<&str> for StateHandle {
    fn eq(
        &self,
        other: &&str,
    ) -> bool {
        self.as_str().as_deref() == Some(*other)
    }
}

impl PartialEq<i64> for StateHandle {
    fn eq(
        &self,
        other: &i64,
    ) -> bool {
        self.as_i64() == Some(*other)
    }
}

impl PartialEq<f64> for StateHandle {
    fn eq(
        &self,
        other: &f64,
    ) -> bool {
        self.as_f64() == Some(*other)
    }
}

impl PartialEq<bool> for StateHandle {
    fn eq(
        &self,
        other: &bool,
    ) -> bool {
        self.as_bool() == Some(*other)
    }
}

/// Navigate a JSON value down `path`, starting below the root value.
///
/// Shared by the store resolvers: the first segment of a collection
/// path is an id lookup (string form), deeper segments navigate objects
/// by key and arrays by index.
pub(crate) fn navigate<'a>(
    value: &'a Value,
    path: &Path,
) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.segments() {
        current = match (current, segment) {
            (Value::Object(map), segment) => map.get(&segment.as_id())?,
            (Value::Array(items), Segment::Index(i)) => items.get(*i as usize)?,
            _ => return None,
        };
    }
    Some(current)
}
