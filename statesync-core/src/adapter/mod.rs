//! Adapter protocol
//!
//! An adapter is a plain record of optional async operations
//! ([`AdapterOps`]): remote request/response, push event streams and
//! durable persistence all plug into stores through this one shape.
//!
//! Composition follows spread semantics: [`AdapterOps::merge`] lays a
//! later adapter over an earlier one, and wherever both provide the same
//! operation the later one wins. Every operation is individually
//! replaceable, so callers may override any single one with an ad-hoc
//! closure.

pub mod durable;
pub mod push;
pub mod queued;
pub mod remote;

#[cfg(test)]
mod durable_test;
#[cfg(test)]
mod push_test;
#[cfg(test)]
mod queued_test;

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::errors::QuotaError;
use crate::errors::Result;
use crate::params::Params;
use self::push::PushBinding;
use self::push::PushHooks;

/// What an adapter operation resolves to: the payload (absent for
/// `204 No Content` replies) plus response metadata: the top-level
/// envelope siblings of the data, pagination fields and the like.
#[derive(Debug, Clone, Default)]
pub struct AdapterReply {
    pub data: Option<Value>,
    pub meta: Option<Value>,
}

impl AdapterReply {
    pub fn with_data(data: Value) -> Self {
        Self {
            data: Some(data),
            meta: None,
        }
    }
}

pub type OpFuture = BoxFuture<'static, Result<AdapterReply>>;

/// Parameter-only operation (`get`, `get_one`, `delete`).
pub type ReadOp = Arc<dyn Fn(Params) -> OpFuture + Send + Sync>;

/// Payload-only operation (`create`; the server assigns identity).
pub type CreateOp = Arc<dyn Fn(Value) -> OpFuture + Send + Sync>;

/// Addressed write (`set`, `patch`): parameters locate the record, the
/// value is the (full or partial) payload.
pub type WriteOp = Arc<dyn Fn(Params, Value) -> OpFuture + Send + Sync>;

/// Starts a push subscription; the returned binding owns the connection
/// task and tears it down on drop.
pub type StreamOp = Arc<dyn Fn(PushHooks) -> PushBinding + Send + Sync>;

/// Durable warm-start read, consulted once at store construction.
pub type PersistLoad = Arc<dyn Fn() -> Option<Value> + Send + Sync>;

/// Durable mirror write, called after each successful reconciliation.
pub type PersistSave =
    Arc<dyn Fn(&Value) -> std::result::Result<(), QuotaError> + Send + Sync>;

/// The durable side-channel that composes with remote/push adapters.
#[derive(Clone)]
pub struct PersistHooks {
    pub load: PersistLoad,
    pub save: PersistSave,
}

/// A store backing: the bag of operations a store coordinator drives.
#[derive(Clone, Default)]
pub struct AdapterOps {
    pub get: Option<ReadOp>,
    pub get_one: Option<ReadOp>,
    pub create: Option<CreateOp>,
    pub set: Option<WriteOp>,
    pub patch: Option<WriteOp>,
    pub delete: Option<ReadOp>,
    pub stream: Option<StreamOp>,
    pub persist: Option<PersistHooks>,
}

impl AdapterOps {
    /// Spread `later` over `self`: wherever both sides provide an
    /// operation, `later` wins.
    pub fn merge(
        self,
        later: AdapterOps,
    ) -> AdapterOps {
        AdapterOps {
            get: later.get.or(self.get),
            get_one: later.get_one.or(self.get_one),
            create: later.create.or(self.create),
            set: later.set.or(self.set),
            patch: later.patch.or(self.patch),
            delete: later.delete.or(self.delete),
            stream: later.stream.or(self.stream),
            persist: later.persist.or(self.persist),
        }
    }
}

macro_rules! require_op {
    ($name:ident, $field:ident, $ty:ty) => {
        impl AdapterOps {
            /// Resolve the operation or fail with a synchronous
            /// configuration error, before anything reaches a transport.
            pub(crate) fn $name(
                &self,
                store_id: &str,
            ) -> Result<$ty> {
                self.$field.clone().ok_or_else(|| {
                    crate::errors::ConfigError::MissingOperation {
                        store_id: store_id.to_string(),
                        operation: stringify!($field),
                    }
                    .into()
                })
            }
        }
    };
}

require_op!(require_get, get, ReadOp);
require_op!(require_get_one, get_one, ReadOp);
require_op!(require_create, create, CreateOp);
require_op!(require_set, set, WriteOp);
require_op!(require_patch, patch, WriteOp);
require_op!(require_delete, delete, ReadOp);
