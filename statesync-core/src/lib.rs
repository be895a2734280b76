//! # statesync-core
//!
//! Client-side state-synchronization engine: typed collections and
//! single values mirrored between an in-memory model, a remote
//! request/response service, an optional server-push event stream and
//! an optional durable key-value store. Consumers observe the model
//! through *path-scoped* subscriptions and are notified only when a
//! mutation touches their location (or an ancestor/descendant of it).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  Your UI binding                             │
//! ├──────────────────────────────────────────────┤
//! │  store::{CollectionStore, SingleStore}       │  coordinators
//! │    bus · handle · cache · status             │  reactive plumbing
//! │    adapter::{remote, queued, push, durable}  │  backings
//! ├──────────────────────────────────────────────┤
//! │  Your Transport │ EventSource │ Durable KV   │  host-provided
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Mutations apply optimistically: the in-memory model updates and
//! subscribers fire *before* the adapter call suspends; on failure the
//! captured snapshot is restored byte-for-byte and subscribers fire
//! again, so callers see a single rejection with the state already
//! consistent.
//!
//! The process-wide pieces (the LRU cache and the FIFO request queue)
//! are explicit context objects carried by [`SyncContext`], never
//! hidden globals.
//!
//! ## Example
//!
//! ```rust,ignore
//! use statesync_core::{CollectionStore, EngineConfig, SyncContext, Params};
//! use statesync_core::adapter::remote::RemoteAdapter;
//!
//! let ctx = SyncContext::new(
//!     EngineConfig::builder()
//!         .base_url("https://api.example.com")
//!         .transport(my_transport)
//!         .build(),
//! );
//!
//! let users = CollectionStore::builder(&ctx, "users")
//!     .adapter(RemoteAdapter::new("/users").into_ops(&ctx))
//!     .build();
//!
//! let _sub = users.handle().key("u1").key("name").subscribe(|| rerender());
//! users.get(Params::new()).await?;
//! users.patch(serde_json::json!({"id": "u1", "name": "Bea"})).await?;
//! ```

pub mod adapter;
mod bus;
mod cache;
mod config;
mod context;
mod errors;
mod handle;
mod params;
mod path;
mod status;
pub mod store;
mod transport;
mod utils;

pub use bus::*;
pub use cache::*;
pub use config::*;
pub use context::*;
pub use errors::*;
pub use handle::*;
pub use params::*;
pub use path::*;
pub use status::*;
pub use store::collection::CollectionStore;
pub use store::collection::CollectionStoreBuilder;
pub use store::single::SingleStore;
pub use store::single::SingleStoreBuilder;
pub use transport::*;
pub use utils::*;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

#[cfg(test)]
mod cache_test;
#[cfg(test)]
mod params_test;
#[cfg(test)]
mod path_test;
