//! End-to-end engine flows against host-provided doubles, through the
//! public API only: a REST-shaped transport, an event-stream source and
//! a key-value backing, composed the way an application would.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use serde_json::json;

use statesync_core::CollectionStore;
use statesync_core::EngineConfig;
use statesync_core::Params;
use statesync_core::SyncContext;
use statesync_core::Transport;
use statesync_core::TransportError;
use statesync_core::TransportRequest;
use statesync_core::TransportResponse;
use statesync_core::adapter::durable::DurableAdapter;
use statesync_core::adapter::durable::DurableBacking;
use statesync_core::adapter::push::EventSource;
use statesync_core::adapter::push::EventStream;
use statesync_core::adapter::push::PushAdapter;
use statesync_core::adapter::push::PushEvent;
use statesync_core::adapter::push::PushMode;
use statesync_core::adapter::push::PushOptions;
use statesync_core::adapter::remote::RemoteAdapter;
use statesync_core::QuotaError;

// ---- host doubles -------------------------------------------------------

#[derive(Default)]
struct FakeServer {
    replies: Mutex<VecDeque<(u16, Value)>>,
    seen: Mutex<Vec<(String, String)>>,
}

impl FakeServer {
    fn reply(
        &self,
        status: u16,
        body: Value,
    ) {
        self.replies.lock().push_back((status, body));
    }

    fn seen(&self) -> Vec<(String, String)> {
        self.seen.lock().clone()
    }
}

#[async_trait::async_trait]
impl Transport for FakeServer {
    async fn send(
        &self,
        request: TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        self.seen
            .lock()
            .push((request.method.as_str().to_string(), request.url.clone()));
        let (status, body) = self.replies.lock().pop_front().unwrap_or((
            500,
            json!({"message": "no scripted reply"}),
        ));
        Ok(TransportResponse {
            status,
            body: Bytes::from(serde_json::to_vec(&body).unwrap()),
        })
    }
}

struct FakeFeed {
    events: Mutex<Option<Vec<PushEvent>>>,
}

impl FakeFeed {
    fn with(events: Vec<(&str, Value)>) -> Self {
        Self {
            events: Mutex::new(Some(
                events
                    .into_iter()
                    .map(|(name, body)| PushEvent {
                        event: name.to_string(),
                        data: Bytes::from(serde_json::to_vec(&body).unwrap()),
                    })
                    .collect(),
            )),
        }
    }
}

#[async_trait::async_trait]
impl EventSource for FakeFeed {
    async fn connect(
        &self,
        _url: &str,
    ) -> Result<EventStream, TransportError> {
        match self.events.lock().take() {
            // After the scripted burst the stream stays open, silent
            Some(events) => Ok(tokio_stream::iter(events.into_iter().map(Ok))
                .chain(futures::stream::pending())
                .boxed()),
            None => Ok(futures::stream::pending().boxed()),
        }
    }
}

#[derive(Default)]
struct FakeKv {
    entries: Mutex<HashMap<String, String>>,
}

impl DurableBacking for FakeKv {
    fn load(
        &self,
        key: &str,
    ) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn store(
        &self,
        key: &str,
        value: &str,
    ) -> Result<(), QuotaError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(
        &self,
        key: &str,
    ) {
        self.entries.lock().remove(key);
    }
}

fn engine(server: Arc<FakeServer>) -> SyncContext {
    SyncContext::new(
        EngineConfig::builder()
            .base_url("https://api.test")
            .transport(server)
            .build(),
    )
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

// ---- flows --------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn full_lifecycle_over_remote_push_and_durable() {
    let server = Arc::new(FakeServer::default());
    let kv = Arc::new(FakeKv::default());
    let ctx = engine(server.clone());

    let feed = FakeFeed::with(vec![
        ("message", json!([{"id": "2", "text": "hi again"}, {"id": "3", "text": "new"}])),
    ]);

    let messages = CollectionStore::builder(&ctx, "messages")
        .adapter(DurableAdapter::new(kv.clone(), "messages").into_ops())
        .adapter(
            RemoteAdapter::new("/rooms/:room/messages")
                .item_endpoint("/messages/:id")
                .into_ops(&ctx),
        )
        .adapter(
            PushAdapter::new(
                Arc::new(feed),
                PushOptions::new("/rooms/lobby/stream", PushMode::Upsert)
                    .event_name("message"),
            )
            .into_ops(&ctx),
        )
        .build();

    // Initial fetch through the remote adapter, with a template variable
    server.reply(
        200,
        json!([{"id": "1", "text": "hello"}, {"id": "2", "text": "hi"}]),
    );
    let fetched = messages.get(Params::new().with("room", "lobby")).await.unwrap();
    assert_eq!(fetched.len(), 2);
    assert_eq!(
        server.seen()[0],
        ("GET".to_string(), "https://api.test/rooms/lobby/messages".to_string())
    );

    // The push burst upserts: "2" rewritten in place, "3" appended
    settle().await;
    assert_eq!(messages.ids(), vec!["1", "2", "3"]);
    assert_eq!(messages.record("2").unwrap()["text"], json!("hi again"));

    // A successful mutation mirrors the whole list durably
    server.reply(200, json!({"id": "1", "text": "hello!", "edited": true}));
    messages.patch(json!({"id": "1", "text": "hello!"})).await.unwrap();
    let mirrored: Value = serde_json::from_str(&kv.load("messages").unwrap()).unwrap();
    assert_eq!(mirrored.as_array().unwrap().len(), 3);
    assert_eq!(mirrored[0]["edited"], json!(true));

    messages.dispose();
}

#[tokio::test(start_paused = true)]
async fn warm_start_serves_before_any_fetch() {
    let server = Arc::new(FakeServer::default());
    let kv = Arc::new(FakeKv::default());
    kv.store("messages", &json!([{"id": "9", "text": "from disk"}]).to_string())
        .unwrap();

    let ctx = engine(server.clone());
    let messages = CollectionStore::builder(&ctx, "messages")
        .adapter(DurableAdapter::new(kv, "messages").into_ops())
        .adapter(RemoteAdapter::new("/messages").into_ops(&ctx))
        .build();

    // Durable state is visible immediately, before any network round trip
    assert_eq!(messages.ids(), vec!["9"]);
    assert_eq!(server.seen().len(), 0);
    assert_eq!(messages.status().last_updated, 0);
}

#[tokio::test(start_paused = true)]
async fn queued_adapter_serializes_two_stores() {
    let server = Arc::new(FakeServer::default());
    let ctx = engine(server.clone());
    let queue = ctx.queue();

    let first = CollectionStore::builder(&ctx, "alpha")
        .adapter(queue.wrap(RemoteAdapter::new("/alpha").into_ops(&ctx)))
        .build();
    let second = CollectionStore::builder(&ctx, "beta")
        .adapter(queue.wrap(RemoteAdapter::new("/beta").into_ops(&ctx)))
        .build();

    server.reply(200, json!([{"id": "a1"}]));
    server.reply(200, json!([{"id": "b1"}]));
    server.reply(200, json!([{"id": "a2"}]));

    let (a, b, c) = tokio::join!(
        first.get(Params::new()),
        second.get(Params::new()),
        first.get(Params::new().with("page", 2)),
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();

    // One global FIFO: requests hit the server in submission order
    let urls: Vec<String> = server.seen().into_iter().map(|(_, url)| url).collect();
    assert_eq!(
        urls,
        vec![
            "https://api.test/alpha".to_string(),
            "https://api.test/beta".to_string(),
            "https://api.test/alpha?page=2".to_string(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn ui_binding_contract_subscribe_and_snapshot() {
    let server = Arc::new(FakeServer::default());
    let ctx = engine(server.clone());
    let store = CollectionStore::builder(&ctx, "users")
        .adapter(RemoteAdapter::new("/users").into_ops(&ctx))
        .build();

    server.reply(200, json!([{"id": "u1", "name": "Ann"}]));
    store.get(Params::new()).await.unwrap();

    // getSnapshot on the root store and on a handle
    assert_eq!(store.value()["u1"]["name"], json!("Ann"));
    let handle = store.handle().key("u1").key("name");
    assert_eq!(handle.as_str().as_deref(), Some("Ann"));

    // subscribe on a handle uses its recorded path
    let notified = Arc::new(Mutex::new(0usize));
    let counter = notified.clone();
    let sub = handle.subscribe(move || {
        *counter.lock() += 1;
    });

    server.reply(200, json!({"id": "u1", "name": "Bea"}));
    store.patch(json!({"id": "u1", "name": "Bea"})).await.unwrap();
    assert!(*notified.lock() >= 1);
    assert_eq!(handle.as_str().as_deref(), Some("Bea"));

    // unmount: the unsubscribe token removes the registration
    sub.unsubscribe();
    store.clear();
    let after = *notified.lock();
    server.reply(200, json!([{"id": "u1", "name": "Cyn"}]));
    store.get(Params::new()).await.unwrap();
    assert_eq!(*notified.lock(), after);
}

#[tokio::test(start_paused = true)]
async fn reconfigure_applies_to_subsequent_operations() {
    let server_one = Arc::new(FakeServer::default());
    let server_two = Arc::new(FakeServer::default());
    let ctx = engine(server_one.clone());

    let store = CollectionStore::builder(&ctx, "users")
        .adapter(RemoteAdapter::new("/users").into_ops(&ctx))
        .build();

    server_one.reply(200, json!([{"id": "u1"}]));
    store.get(Params::new()).await.unwrap();
    assert_eq!(server_one.seen().len(), 1);

    // Swap the whole configuration; the adapter picks it up on the
    // next operation
    ctx.reconfigure(
        EngineConfig::builder()
            .base_url("https://api2.test")
            .transport(server_two.clone())
            .build(),
    );

    server_two.reply(200, json!([{"id": "u1"}]));
    store.get(Params::new().with("_force", true)).await.unwrap();
    assert_eq!(server_one.seen().len(), 1);
    assert_eq!(
        server_two.seen()[0].1,
        "https://api2.test/users".to_string()
    );
}
