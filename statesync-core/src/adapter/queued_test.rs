use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::json;

use super::AdapterOps;
use super::AdapterReply;
use super::queued::*;
use crate::errors::Error;
use crate::errors::Result;
use crate::errors::TransportError;
use crate::params::Params;

type StartLog = Arc<Mutex<Vec<&'static str>>>;

/// An adapter whose `get` records its start, dawdles, then settles.
fn recording_ops(
    label: &'static str,
    starts: StartLog,
    fail: bool,
) -> AdapterOps {
    let get: super::ReadOp = Arc::new(move |_params: Params| {
        let starts = starts.clone();
        async move {
            starts.lock().push(label);
            tokio::time::sleep(Duration::from_millis(5)).await;
            if fail {
                Err(Error::from(TransportError::Status {
                    status: 500,
                    message: format!("{label} failed"),
                    url: String::new(),
                }))
            } else {
                Ok(AdapterReply::with_data(json!({ "from": label })))
            }
        }
        .boxed()
    });
    AdapterOps {
        get: Some(get),
        ..AdapterOps::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_fifo_across_stores_with_a_failing_task() {
    let queue = Arc::new(RequestQueue::new());
    let starts: StartLog = Arc::new(Mutex::new(Vec::new()));

    // Two stores share the one queue
    let store_one = [
        ("A", false),
        ("C", true),
        ("E", false),
    ]
    .map(|(label, fail)| queue.wrap(recording_ops(label, starts.clone(), fail)));
    let store_two = [("B", false), ("D", false)]
        .map(|(label, fail)| queue.wrap(recording_ops(label, starts.clone(), fail)));

    // Submit interleaved: A, B, C, D, E
    let futures: Vec<_> = vec![
        (store_one[0].get.clone().unwrap())(Params::new()),
        (store_two[0].get.clone().unwrap())(Params::new()),
        (store_one[1].get.clone().unwrap())(Params::new()),
        (store_two[1].get.clone().unwrap())(Params::new()),
        (store_one[2].get.clone().unwrap())(Params::new()),
    ];
    let outcomes: Vec<Result<AdapterReply>> = futures::future::join_all(futures).await;

    // Transport start order is submission order
    assert_eq!(*starts.lock(), vec!["A", "B", "C", "D", "E"]);

    // C rejects its own caller; D and E still ran
    assert!(outcomes[0].is_ok());
    assert!(outcomes[1].is_ok());
    assert!(matches!(
        outcomes[2],
        Err(Error::Transport(TransportError::Status { status: 500, .. }))
    ));
    assert!(outcomes[3].is_ok());
    assert!(outcomes[4].is_ok());
    assert_eq!(
        outcomes[4].as_ref().unwrap().data,
        Some(json!({"from": "E"}))
    );
}

#[tokio::test(start_paused = true)]
async fn test_tasks_do_not_overlap() {
    let queue = Arc::new(RequestQueue::new());
    let active = Arc::new(Mutex::new((0usize, 0usize))); // (current, peak)

    let ops: Vec<AdapterOps> = (0..4)
        .map(|_| {
            let active = active.clone();
            let get: super::ReadOp = Arc::new(move |_params: Params| {
                let active = active.clone();
                async move {
                    {
                        let mut guard = active.lock();
                        guard.0 += 1;
                        guard.1 = guard.1.max(guard.0);
                    }
                    tokio::time::sleep(Duration::from_millis(3)).await;
                    active.lock().0 -= 1;
                    Ok(AdapterReply::default())
                }
                .boxed()
            });
            queue.wrap(AdapterOps {
                get: Some(get),
                ..AdapterOps::default()
            })
        })
        .collect();

    let futures: Vec<_> =
        ops.iter().map(|o| (o.get.clone().unwrap())(Params::new())).collect();
    futures::future::join_all(futures).await;

    assert_eq!(active.lock().1, 1, "queued tasks must run one at a time");
}

#[tokio::test]
async fn test_wrap_leaves_stream_and_persist_untouched() {
    let queue = Arc::new(RequestQueue::new());
    let wrapped = queue.wrap(AdapterOps::default());
    assert!(wrapped.get.is_none());
    assert!(wrapped.stream.is_none());
    assert!(wrapped.persist.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_caller_does_not_stall_the_queue() {
    let queue = Arc::new(RequestQueue::new());
    let starts: StartLog = Arc::new(Mutex::new(Vec::new()));

    let first = queue.wrap(recording_ops("first", starts.clone(), false));
    let second = queue.wrap(recording_ops("second", starts.clone(), false));

    // Caller walks away from the first operation immediately
    drop((first.get.unwrap())(Params::new()));

    let reply = (second.get.unwrap())(Params::new()).await.unwrap();
    assert_eq!(reply.data, Some(json!({"from": "second"})));
    assert_eq!(*starts.lock(), vec!["first", "second"]);
}
