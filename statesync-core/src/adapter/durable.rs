//! Durable key-value adapter
//!
//! Backed by a host-provided synchronous key-value interface
//! ([`DurableBacking`], a `localStorage`-shaped contract). Two ways to
//! use it:
//!
//! 1. **Sole adapter.** The CRUD-on-array operations let a store run
//!    entirely against durable storage, with monotonic numeric ids
//!    assigned on `create` (server-assigned-id semantics, minus the
//!    server).
//! 2. **Mirror.** The `persist` hooks compose with remote/push
//!    adapters: `load` warm-starts store state once at construction,
//!    `save` mirrors state after each successful reconciliation. A
//!    rejected mirror write is logged and the in-memory state stays
//!    authoritative.

use std::sync::Arc;

use futures::FutureExt;
#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;
use serde_json::Value;
use tracing::warn;

use super::AdapterOps;
use super::AdapterReply;
use super::PersistHooks;
use crate::errors::ConfigError;
use crate::errors::NotFoundError;
use crate::errors::QuotaError;
use crate::errors::Result;
use crate::params::Params;
use crate::utils::record_id;

/// Host-provided synchronous key-value storage.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
pub trait DurableBacking: Send + Sync + 'static {
    fn load(
        &self,
        key: &str,
    ) -> Option<String>;

    /// A rejected write (quota, serialization limits) is a
    /// [`QuotaError`]; callers decide whether it is fatal.
    fn store(
        &self,
        key: &str,
        value: &str,
    ) -> std::result::Result<(), QuotaError>;

    fn remove(
        &self,
        key: &str,
    );
}

/// Builder for a durable backing under one storage key.
pub struct DurableAdapter {
    backing: Arc<dyn DurableBacking>,
    key: String,
    default: Option<Value>,
}

impl DurableAdapter {
    pub fn new(
        backing: Arc<dyn DurableBacking>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            backing,
            key: key.into(),
            default: None,
        }
    }

    /// Value served when the storage key is empty or unreadable.
    pub fn default_value(
        mut self,
        default: Value,
    ) -> Self {
        self.default = Some(default);
        self
    }

    /// Materialize the operation record: full CRUD against the stored
    /// array plus the persist hooks.
    pub fn into_ops(self) -> AdapterOps {
        let shared = Arc::new(DurableShared {
            backing: self.backing,
            key: self.key,
            default: self.default,
        });

        let s = shared.clone();
        let get: super::ReadOp = Arc::new(move |_params| {
            let items = s.read_items();
            async move { Ok(AdapterReply::with_data(Value::Array(items))) }.boxed()
        });

        let s = shared.clone();
        let get_one: super::ReadOp = Arc::new(move |params| {
            let outcome = s.find(&params);
            async move { outcome.map(AdapterReply::with_data) }.boxed()
        });

        let s = shared.clone();
        let create: super::CreateOp = Arc::new(move |data| {
            let outcome = s.create(data);
            async move { outcome.map(AdapterReply::with_data) }.boxed()
        });

        let s = shared.clone();
        let set: super::WriteOp = Arc::new(move |params, data| {
            let outcome = s.replace(&params, data);
            async move { outcome.map(AdapterReply::with_data) }.boxed()
        });

        let s = shared.clone();
        let patch: super::WriteOp = Arc::new(move |params, partial| {
            let outcome = s.merge(&params, partial);
            async move { outcome.map(AdapterReply::with_data) }.boxed()
        });

        let s = shared.clone();
        let delete: super::ReadOp = Arc::new(move |params| {
            let outcome = s.delete(&params);
            async move {
                outcome?;
                Ok(AdapterReply::default())
            }
            .boxed()
        });

        let s = shared.clone();
        let load: super::PersistLoad = Arc::new(move || s.read_raw());
        let s = shared;
        let save: super::PersistSave = Arc::new(move |value: &Value| s.write_raw(value));

        AdapterOps {
            get: Some(get),
            get_one: Some(get_one),
            create: Some(create),
            set: Some(set),
            patch: Some(patch),
            delete: Some(delete),
            stream: None,
            persist: Some(PersistHooks { load, save }),
        }
    }
}

struct DurableShared {
    backing: Arc<dyn DurableBacking>,
    key: String,
    default: Option<Value>,
}

impl DurableShared {
    /// The stored value, falling back to the configured default. An
    /// unreadable payload is logged and treated as absent.
    fn read_raw(&self) -> Option<Value> {
        match self.backing.load(&self.key) {
            None => self.default.clone(),
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(key = %self.key, %err, "stored payload unreadable, using default");
                    self.default.clone()
                }
            },
        }
    }

    fn write_raw(
        &self,
        value: &Value,
    ) -> std::result::Result<(), QuotaError> {
        let raw = serde_json::to_string(value).map_err(|err| QuotaError {
            key: self.key.clone(),
            reason: err.to_string(),
        })?;
        self.backing.store(&self.key, &raw)
    }

    fn read_items(&self) -> Vec<Value> {
        match self.read_raw() {
            Some(Value::Array(items)) => items,
            Some(single) => vec![single],
            None => Vec::new(),
        }
    }

    fn write_items(
        &self,
        items: Vec<Value>,
    ) -> Result<()> {
        self.write_raw(&Value::Array(items))?;
        Ok(())
    }

    fn require_id(
        &self,
        params: &Params,
        operation: &'static str,
    ) -> Result<String> {
        params.id_value().ok_or_else(|| {
            ConfigError::MissingId {
                store_id: self.key.clone(),
                operation,
            }
            .into()
        })
    }

    fn position(
        items: &[Value],
        id: &str,
    ) -> Option<usize> {
        items.iter().position(|item| record_id(item).as_deref() == Some(id))
    }

    fn find(
        &self,
        params: &Params,
    ) -> Result<Value> {
        let id = self.require_id(params, "get_one")?;
        let items = self.read_items();
        match Self::position(&items, &id) {
            Some(index) => Ok(items[index].clone()),
            None => Err(NotFoundError {
                store_id: self.key.clone(),
                id,
            }
            .into()),
        }
    }

    fn create(
        &self,
        data: Value,
    ) -> Result<Value> {
        let mut items = self.read_items();

        let mut record = data;
        if record_id(&record).is_none() {
            let next = items
                .iter()
                .filter_map(|item| record_id(item)?.parse::<u64>().ok())
                .max()
                .map(|max| max + 1)
                .unwrap_or(1);
            if let Value::Object(map) = &mut record {
                map.insert("id".to_string(), Value::String(next.to_string()));
            }
        }

        items.push(record.clone());
        self.write_items(items)?;
        Ok(record)
    }

    fn replace(
        &self,
        params: &Params,
        data: Value,
    ) -> Result<Value> {
        let id = self.require_id(params, "set")?;
        let mut items = self.read_items();
        match Self::position(&items, &id) {
            Some(index) => items[index] = data.clone(),
            None => items.push(data.clone()),
        }
        self.write_items(items)?;
        Ok(data)
    }

    fn merge(
        &self,
        params: &Params,
        partial: Value,
    ) -> Result<Value> {
        let id = self.require_id(params, "patch")?;
        let mut items = self.read_items();
        let index = Self::position(&items, &id).ok_or_else(|| NotFoundError {
            store_id: self.key.clone(),
            id: id.clone(),
        })?;

        if let (Value::Object(target), Value::Object(changes)) = (&mut items[index], partial) {
            for (key, value) in changes {
                target.insert(key, value);
            }
        }
        let merged = items[index].clone();
        self.write_items(items)?;
        Ok(merged)
    }

    fn delete(
        &self,
        params: &Params,
    ) -> Result<()> {
        let id = self.require_id(params, "delete")?;
        let mut items = self.read_items();
        let index = Self::position(&items, &id).ok_or_else(|| NotFoundError {
            store_id: self.key.clone(),
            id,
        })?;
        items.remove(index);
        self.write_items(items)
    }
}
