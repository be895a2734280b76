#![warn(missing_docs)]

//! # statesync - Client-Side State Synchronization Engine
//!
//! **Reactive stores that mirror remote state, with path-scoped
//! subscriptions, optimistic mutations and pluggable backings**
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! statesync = "0.1"
//! ```
//!
//! ```rust,ignore
//! use statesync::prelude::*;
//!
//! // One context per process: shared cache, shared request queue,
//! // hot-swappable configuration.
//! let ctx = SyncContext::new(
//!     EngineConfig::builder()
//!         .base_url("https://api.example.com")
//!         .transport(my_transport)
//!         .headers(|| vec![("authorization".into(), token())])
//!         .build(),
//! );
//!
//! // A collection mirrored over REST, streamed over push, mirrored
//! // into durable storage.
//! let messages = CollectionStore::builder(&ctx, "messages")
//!     .adapter(DurableAdapter::new(local_kv, "messages").into_ops())
//!     .adapter(RemoteAdapter::new("/rooms/:room/messages").into_ops(&ctx))
//!     .adapter(
//!         PushAdapter::new(
//!             my_event_source,
//!             PushOptions::new("/rooms/lobby/stream", PushMode::Upsert),
//!         )
//!         .into_ops(&ctx),
//!     )
//!     .build();
//!
//! // Subscribe at any granularity: collection, record, field.
//! let name = messages.handle().key("m1").key("author");
//! let _sub = name.subscribe(|| rerender());
//! ```
//!
//! ## Crate Organization
//!
//! | Crate | Purpose | Use When |
//! |-------|---------|----------|
//! | **statesync** | Unified API | Most applications |
//! | [`statesync-core`](https://crates.io/crates/statesync-core) | Engine internals | Custom adapters, embedded bindings |
//!
//! ## Key Pieces
//!
//! - [`CollectionStore`] / [`SingleStore`] - the store coordinators
//! - [`StateHandle`] - path-tracking observation over live state
//! - [`SyncContext`] - the explicit process-wide cache, queue and config
//! - [`adapter`] - remote, queued, push and durable backings
//!
//! A store is configured by *spreading* adapters: later adapters win per
//! operation, and any single operation can be overridden with an ad-hoc
//! closure.

pub use statesync_core::*;

/// The adapter toolbox: remote request/response, queued FIFO execution,
/// server-push streams and durable key-value persistence.
pub mod adapter {
    pub use statesync_core::adapter::AdapterOps;
    pub use statesync_core::adapter::AdapterReply;
    pub use statesync_core::adapter::PersistHooks;
    pub use statesync_core::adapter::durable::DurableAdapter;
    pub use statesync_core::adapter::durable::DurableBacking;
    pub use statesync_core::adapter::push::BackoffPolicy;
    pub use statesync_core::adapter::push::EventSource;
    pub use statesync_core::adapter::push::PushAdapter;
    pub use statesync_core::adapter::push::PushEvent;
    pub use statesync_core::adapter::push::PushMode;
    pub use statesync_core::adapter::push::PushOptions;
    pub use statesync_core::adapter::queued::RequestQueue;
    pub use statesync_core::adapter::remote::RemoteAdapter;
}

/// Everything a typical embedding needs, one import away.
pub mod prelude {
    pub use crate::adapter::AdapterOps;
    pub use crate::adapter::DurableAdapter;
    pub use crate::adapter::PushAdapter;
    pub use crate::adapter::PushMode;
    pub use crate::adapter::PushOptions;
    pub use crate::adapter::RemoteAdapter;
    pub use statesync_core::CollectionStore;
    pub use statesync_core::EngineConfig;
    pub use statesync_core::Params;
    pub use statesync_core::Path;
    pub use statesync_core::Segment;
    pub use statesync_core::SingleStore;
    pub use statesync_core::StateHandle;
    pub use statesync_core::StoreStatus;
    pub use statesync_core::SyncContext;
}
