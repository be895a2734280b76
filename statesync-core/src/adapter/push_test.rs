use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use serde_json::json;
use tracing_test::traced_test;

use super::push::*;
use crate::config::EngineConfig;
use crate::context::SyncContext;
use crate::errors::TransportError;
use crate::status::ConnectionStatus;
use crate::status::HostSignal;

type StatusLog = Arc<Mutex<Vec<(ConnectionStatus, Option<String>)>>>;
type BatchLog = Arc<Mutex<Vec<Vec<Value>>>>;

fn recording_hooks() -> (PushHooks, StatusLog, BatchLog) {
    let statuses: StatusLog = Arc::new(Mutex::new(Vec::new()));
    let batches: BatchLog = Arc::new(Mutex::new(Vec::new()));

    let status_log = statuses.clone();
    let batch_log = batches.clone();
    let hooks = PushHooks {
        apply: Arc::new(move |batch: PushBatch| {
            batch_log.lock().push(batch.items);
        }),
        status: Arc::new(move |status, error| {
            status_log.lock().push((status, error));
        }),
    };
    (hooks, statuses, batches)
}

fn event(
    name: &str,
    body: &str,
) -> PushEvent {
    PushEvent {
        event: name.to_string(),
        data: Bytes::from(body.to_string()),
    }
}

fn stream_of(events: Vec<PushEvent>) -> EventStream {
    tokio_stream::iter(events.into_iter().map(Ok)).boxed()
}

fn ctx() -> SyncContext {
    SyncContext::new(EngineConfig::builder().build())
}

/// Spin until `done` holds; paused-clock sleeps auto-advance.
async fn wait_for(done: impl Fn() -> bool) {
    for _ in 0..500 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

fn single_shot_backoff() -> BackoffPolicy {
    BackoffPolicy {
        max_attempts: 0,
        ..BackoffPolicy::default()
    }
}

#[test]
fn test_backoff_delay_grows_and_caps() {
    let policy = BackoffPolicy {
        base: Duration::from_millis(100),
        cap: Duration::from_millis(350),
        multiplier: 2.0,
        max_attempts: 10,
    };

    for _ in 0..50 {
        assert!(policy.delay(1) <= Duration::from_millis(100));
        assert!(policy.delay(2) <= Duration::from_millis(200));
        // 100 * 2^3 = 800 is clipped by the cap
        assert!(policy.delay(4) <= Duration::from_millis(350));
        assert!(policy.delay(24) <= Duration::from_millis(350));
    }
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_events_are_filtered_decoded_and_applied() {
    let mut source = MockEventSource::new();
    source.expect_connect().times(1).returning(|_| {
        Ok(stream_of(vec![
            event("noise", r#"[{"id":"x"}]"#),
            event("update", "not json at all"),
            event("update", r#"[{"id":"1","v":1},{"id":"2","v":2}]"#),
            event("update", r#"{"id":"3","v":3}"#),
        ]))
    });

    let options = PushOptions::new("/stream", PushMode::Upsert)
        .event_name("update")
        .backoff(single_shot_backoff());
    let ops = PushAdapter::new(Arc::new(source), options).into_ops(&ctx());

    let (hooks, statuses, batches) = recording_hooks();
    let _binding = (ops.stream.unwrap())(hooks);

    wait_for(|| {
        statuses.lock().iter().any(|(s, _)| *s == ConnectionStatus::Closed)
    })
    .await;

    let applied = batches.lock().clone();
    // The wrong-name event is filtered, the bad body is skipped, the
    // single object is wrapped into a one-item batch
    assert_eq!(
        applied,
        vec![
            vec![json!({"id":"1","v":1}), json!({"id":"2","v":2})],
            vec![json!({"id":"3","v":3})],
        ]
    );
    assert!(logs_contain("dropping unparseable push event"));
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_until_attempts_exhausted() {
    let mut source = MockEventSource::new();
    source.expect_connect().times(3).returning(|_| {
        Err(TransportError::Network {
            url: "/stream".to_string(),
            reason: "refused".to_string(),
        })
    });

    let options = PushOptions::new("/stream", PushMode::Replace).backoff(BackoffPolicy {
        base: Duration::from_millis(10),
        cap: Duration::from_millis(10),
        multiplier: 1.0,
        max_attempts: 2,
    });
    let ops = PushAdapter::new(Arc::new(source), options).into_ops(&ctx());

    let (hooks, statuses, _batches) = recording_hooks();
    let _binding = (ops.stream.unwrap())(hooks);

    wait_for(|| {
        statuses.lock().iter().any(|(s, _)| *s == ConnectionStatus::Closed)
    })
    .await;

    let log = statuses.lock().clone();
    let connects = log.iter().filter(|(s, _)| *s == ConnectionStatus::Connecting).count();
    let retries = log.iter().filter(|(s, _)| *s == ConnectionStatus::Retrying).count();
    assert_eq!(connects, 3);
    assert_eq!(retries, 3);
    assert_eq!(
        log.last().unwrap().1.as_deref(),
        Some("reconnect attempts exhausted")
    );
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_heartbeat_silence_triggers_reconnect() {
    // A stream that stays open but never yields
    let mut source = MockEventSource::new();
    source
        .expect_connect()
        .times(1)
        .returning(|_| Ok(futures::stream::pending().boxed()));

    let options = PushOptions::new("/stream", PushMode::Replace)
        .heartbeat_timeout(Duration::from_secs(15))
        .backoff(single_shot_backoff());
    let ops = PushAdapter::new(Arc::new(source), options).into_ops(&ctx());

    let (hooks, statuses, _batches) = recording_hooks();
    let _binding = (ops.stream.unwrap())(hooks);

    wait_for(|| {
        statuses
            .lock()
            .iter()
            .any(|(s, e)| *s == ConnectionStatus::Retrying && e.as_deref() == Some("heartbeat timeout"))
    })
    .await;
    assert!(logs_contain("push heartbeat lost"));
}

#[tokio::test(start_paused = true)]
async fn test_hidden_pauses_and_focus_resumes() {
    let mut source = MockEventSource::new();
    source
        .expect_connect()
        .times(2)
        .returning(|_| Ok(futures::stream::pending().boxed()));

    let options = PushOptions::new("/stream", PushMode::Replace)
        .pause_when_hidden(true)
        .backoff(single_shot_backoff());
    let ctx = ctx();
    let ops = PushAdapter::new(Arc::new(source), options).into_ops(&ctx);

    let (hooks, statuses, _batches) = recording_hooks();
    let _binding = (ops.stream.unwrap())(hooks);

    wait_for(|| {
        statuses.lock().iter().any(|(s, _)| *s == ConnectionStatus::Open)
    })
    .await;

    ctx.emit(HostSignal::Hidden);
    wait_for(|| {
        statuses.lock().iter().any(|(s, _)| *s == ConnectionStatus::Closed)
    })
    .await;

    ctx.emit(HostSignal::FocusGained);
    wait_for(|| {
        statuses
            .lock()
            .iter()
            .filter(|(s, _)| *s == ConnectionStatus::Open)
            .count()
            == 2
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_binding_drop_tears_the_connection_down() {
    let mut source = MockEventSource::new();
    source
        .expect_connect()
        .times(1)
        .returning(|_| Ok(futures::stream::pending().boxed()));

    let options = PushOptions::new("/stream", PushMode::Replace);
    let ops = PushAdapter::new(Arc::new(source), options).into_ops(&ctx());

    let (hooks, statuses, _batches) = recording_hooks();
    let binding = (ops.stream.unwrap())(hooks);

    wait_for(|| {
        statuses.lock().iter().any(|(s, _)| *s == ConnectionStatus::Open)
    })
    .await;

    drop(binding);
    tokio::time::sleep(Duration::from_millis(50)).await;

    // No further lifecycle transitions after teardown
    let len = statuses.lock().len();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(statuses.lock().len(), len);
}
