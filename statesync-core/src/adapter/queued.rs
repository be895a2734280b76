//! Queued remote execution
//!
//! A [`RequestQueue`] is the engine's only cross-store ordering
//! primitive: every operation routed through one queue runs in strict
//! submission order, one at a time, across *all* stores sharing it. A
//! failing task rejects its own caller and the next task still runs.
//!
//! This is the pressure valve for low-priority batch work: wrap any
//! adapter with [`RequestQueue::wrap`] to serialize it.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::trace;

use super::AdapterOps;
use super::AdapterReply;
use super::OpFuture;
use crate::errors::Result;
use crate::errors::TransportError;

type QueueTask = BoxFuture<'static, ()>;

/// A process-wide FIFO for adapter operations.
///
/// Explicitly constructed and shared through
/// [`SyncContext`](crate::context::SyncContext), never a hidden global,
/// so tests and multi-tenant embeddings isolate their own instance.
pub struct RequestQueue {
    sender: Mutex<Option<mpsc::UnboundedSender<QueueTask>>>,
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestQueue {
    pub fn new() -> Self {
        Self {
            sender: Mutex::new(None),
        }
    }

    /// The drain worker is spawned lazily so the queue can be built
    /// before a runtime exists.
    fn sender(&self) -> mpsc::UnboundedSender<QueueTask> {
        let mut slot = self.sender.lock();
        if let Some(sender) = slot.as_ref() {
            if !sender.is_closed() {
                return sender.clone();
            }
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<QueueTask>();
        tokio::spawn(async move {
            debug!("request queue worker started");
            while let Some(task) = rx.recv().await {
                // The task settles its own waiter; a failure never
                // stops the drain.
                task.await;
            }
            debug!("request queue worker stopped");
        });
        *slot = Some(tx.clone());
        tx
    }

    /// Append an operation future; it starts only after every prior
    /// task has settled.
    pub fn run_op(
        self: &Arc<Self>,
        op: OpFuture,
    ) -> OpFuture {
        let (done_tx, done_rx) = oneshot::channel::<Result<AdapterReply>>();
        let task: QueueTask = async move {
            let outcome = op.await;
            // Caller may have stopped listening; the queue moves on
            let _ = done_tx.send(outcome);
        }
        .boxed();

        if self.sender().send(task).is_err() {
            return async {
                Err(TransportError::Network {
                    url: "<queue>".to_string(),
                    reason: "request queue worker is gone".to_string(),
                }
                .into())
            }
            .boxed();
        }
        trace!("operation enqueued");

        async move {
            match done_rx.await {
                Ok(outcome) => outcome,
                Err(_) => Err(TransportError::Network {
                    url: "<queue>".to_string(),
                    reason: "request queue worker is gone".to_string(),
                }
                .into()),
            }
        }
        .boxed()
    }

    /// Serialize every request/response operation of `ops` through this
    /// queue. Push streams and persistence hooks pass through untouched.
    pub fn wrap(
        self: &Arc<Self>,
        ops: AdapterOps,
    ) -> AdapterOps {
        let read = |queue: Arc<Self>, inner: super::ReadOp| -> super::ReadOp {
            Arc::new(move |params| queue.run_op(inner(params)))
        };
        let write = |queue: Arc<Self>, inner: super::WriteOp| -> super::WriteOp {
            Arc::new(move |params, data| queue.run_op(inner(params, data)))
        };

        AdapterOps {
            get: ops.get.map(|inner| read(self.clone(), inner)),
            get_one: ops.get_one.map(|inner| read(self.clone(), inner)),
            create: ops.create.map(|inner| -> super::CreateOp {
                let queue = self.clone();
                Arc::new(move |data| queue.run_op(inner(data)))
            }),
            set: ops.set.map(|inner| write(self.clone(), inner)),
            patch: ops.patch.map(|inner| write(self.clone(), inner)),
            delete: ops.delete.map(|inner| read(self.clone(), inner)),
            stream: ops.stream,
            persist: ops.persist,
        }
    }
}
