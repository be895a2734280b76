//! Server-push adapter
//!
//! Owns the event-stream connection for a store: connect, filter and
//! decode events, detect heartbeat silence, reconnect with jittered
//! exponential backoff up to an attempt cap, optionally pause while the
//! tab is hidden and resume on focus or connectivity.
//!
//! Push failures never reject a consumer future: they surface through
//! the store's `connection` status and trigger reconnection. An
//! undecodable event body is logged and skipped; the stream survives.
//!
//! How a decoded payload mutates the collection (`replace`, `append`,
//! `upsert`) is carried alongside each batch; the collection store
//! applies it to its own state without any optimistic machinery and
//! without touching the cache.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;
use rand::Rng;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::warn;

use super::AdapterOps;
use super::StreamOp;
use crate::context::SyncContext;
use crate::errors::ParseError;
use crate::errors::TransportError;
use crate::status::ConnectionStatus;
use crate::status::HostSignal;

/// How an incoming payload mutates the current list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushMode {
    /// The payload supplants the whole list
    Replace,
    /// Payload items are appended, deduplicated and bounded
    Append,
    /// Same-id items overwrite in place, new ids are appended
    Upsert,
}

/// One raw event off the stream.
#[derive(Debug, Clone)]
pub struct PushEvent {
    pub event: String,
    pub data: Bytes,
}

/// A live event stream; `None` means the server closed it.
pub type EventStream = BoxStream<'static, std::result::Result<PushEvent, TransportError>>;

/// Host-provided event-stream connector (an SSE/WebSocket-shaped
/// interface; the core never opens sockets itself).
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait::async_trait]
pub trait EventSource: Send + Sync + 'static {
    async fn connect(
        &self,
        url: &str,
    ) -> std::result::Result<EventStream, TransportError>;
}

/// Extracts the dedupe key of a payload item; `None` falls back to the
/// item's `id`.
pub type DedupeKeyFn = Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>;

/// Jittered exponential reconnect backoff.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub multiplier: f64,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 10,
        }
    }
}

impl BackoffPolicy {
    /// Full-jitter delay for a 1-based attempt number.
    pub fn delay(
        &self,
        attempt: u32,
    ) -> Duration {
        let exponential = self.base.as_millis() as f64
            * self.multiplier.powi(attempt.saturating_sub(1).min(24) as i32);
        let capped = exponential.min(self.cap.as_millis() as f64).max(0.0) as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=capped))
    }
}

/// A decoded payload plus the integration rule for it.
pub struct PushBatch {
    pub mode: PushMode,
    pub dedupe_key: Option<DedupeKeyFn>,
    pub max_items: Option<usize>,
    pub items: Vec<Value>,
}

/// What the store hands the adapter when starting the stream.
#[derive(Clone)]
pub struct PushHooks {
    /// Integrate one decoded batch into store state
    pub apply: Arc<dyn Fn(PushBatch) + Send + Sync>,
    /// Mirror connection lifecycle into the store status
    pub status: Arc<dyn Fn(ConnectionStatus, Option<String>) + Send + Sync>,
}

/// Owns the connection task; dropping it (or the store disposing it)
/// tears the connection down.
pub struct PushBinding {
    task: JoinHandle<()>,
}

impl PushBinding {
    pub fn dispose(&self) {
        self.task.abort();
    }
}

impl Drop for PushBinding {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Push configuration.
pub struct PushOptions {
    pub endpoint: String,
    pub mode: PushMode,
    /// Only events with this name are integrated; `None` accepts all
    pub event_name: Option<String>,
    pub dedupe_key: Option<DedupeKeyFn>,
    pub max_items: Option<usize>,
    /// Reconnect when the stream stays silent this long
    pub heartbeat_timeout: Option<Duration>,
    pub backoff: BackoffPolicy,
    /// Drop the connection while the tab is hidden, reconnect on
    /// focus/online
    pub pause_when_hidden: bool,
}

impl PushOptions {
    pub fn new(
        endpoint: impl Into<String>,
        mode: PushMode,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            mode,
            event_name: None,
            dedupe_key: None,
            max_items: None,
            heartbeat_timeout: None,
            backoff: BackoffPolicy::default(),
            pause_when_hidden: false,
        }
    }

    pub fn event_name(
        mut self,
        name: impl Into<String>,
    ) -> Self {
        self.event_name = Some(name.into());
        self
    }

    pub fn dedupe_key(
        mut self,
        key: DedupeKeyFn,
    ) -> Self {
        self.dedupe_key = Some(key);
        self
    }

    pub fn max_items(
        mut self,
        bound: usize,
    ) -> Self {
        self.max_items = Some(bound);
        self
    }

    pub fn heartbeat_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.heartbeat_timeout = Some(timeout);
        self
    }

    pub fn backoff(
        mut self,
        policy: BackoffPolicy,
    ) -> Self {
        self.backoff = policy;
        self
    }

    pub fn pause_when_hidden(
        mut self,
        pause: bool,
    ) -> Self {
        self.pause_when_hidden = pause;
        self
    }
}

/// Builder for the push backing of one store.
pub struct PushAdapter {
    source: Arc<dyn EventSource>,
    options: PushOptions,
}

impl PushAdapter {
    pub fn new(
        source: Arc<dyn EventSource>,
        options: PushOptions,
    ) -> Self {
        Self { source, options }
    }

    /// Materialize the operation record: a push adapter only provides
    /// the stream operation and composes with remote/durable ops.
    pub fn into_ops(
        self,
        ctx: &SyncContext,
    ) -> AdapterOps {
        let source = self.source;
        let options = Arc::new(self.options);
        let ctx = ctx.clone();

        let stream: StreamOp = Arc::new(move |hooks: PushHooks| {
            let task = tokio::spawn(run_connection(
                source.clone(),
                options.clone(),
                ctx.clone(),
                hooks,
            ));
            PushBinding { task }
        });

        AdapterOps {
            stream: Some(stream),
            ..AdapterOps::default()
        }
    }
}

enum StreamStep {
    Event(PushEvent),
    StreamError(TransportError),
    Ended,
    HeartbeatLost,
}

async fn next_step(
    stream: &mut EventStream,
    heartbeat: Option<Duration>,
) -> StreamStep {
    let next = stream.next();
    let item = match heartbeat {
        None => next.await,
        Some(timeout) => match tokio::time::timeout(timeout, next).await {
            Ok(item) => item,
            Err(_) => return StreamStep::HeartbeatLost,
        },
    };
    match item {
        Some(Ok(event)) => StreamStep::Event(event),
        Some(Err(err)) => StreamStep::StreamError(err),
        None => StreamStep::Ended,
    }
}

/// Wait for the next host signal; parks forever once the channel is
/// gone so the stream branch of the select keeps running alone.
async fn next_signal(signals: &mut broadcast::Receiver<HostSignal>) -> HostSignal {
    loop {
        match signals.recv().await {
            Ok(signal) => return signal,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "push adapter lagged behind host signals");
            }
            Err(broadcast::error::RecvError::Closed) => {
                futures::future::pending::<()>().await;
            }
        }
    }
}

/// Wait for a resume trigger while paused. `false` means the signal
/// channel is gone and the connection stays down.
async fn wait_for_resume(signals: &mut broadcast::Receiver<HostSignal>) -> bool {
    loop {
        match signals.recv().await {
            Ok(HostSignal::FocusGained) | Ok(HostSignal::Online) => return true,
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return false,
        }
    }
}

/// Like [`wait_for_resume`] but parks forever on a closed channel, so a
/// backoff sleep it races against still runs its full course.
async fn wake_signal(signals: &mut broadcast::Receiver<HostSignal>) {
    if !wait_for_resume(signals).await {
        futures::future::pending::<()>().await;
    }
}

async fn run_connection(
    source: Arc<dyn EventSource>,
    options: Arc<PushOptions>,
    ctx: SyncContext,
    hooks: PushHooks,
) {
    let mut signals = ctx.subscribe_signals();
    let mut attempt: u32 = 0;

    'reconnect: loop {
        (hooks.status)(ConnectionStatus::Connecting, None);

        let mut stream = match source.connect(&options.endpoint).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(endpoint = %options.endpoint, %err, "push connect failed");
                (hooks.status)(ConnectionStatus::Retrying, Some(err.to_string()));
                if !backoff_pause(&options, &mut attempt, &mut signals, &hooks).await {
                    return;
                }
                continue 'reconnect;
            }
        };

        debug!(endpoint = %options.endpoint, "push stream open");
        (hooks.status)(ConnectionStatus::Open, None);
        attempt = 0;

        loop {
            tokio::select! {
                signal = next_signal(&mut signals) => {
                    if signal == HostSignal::Hidden && options.pause_when_hidden {
                        debug!("push stream paused while hidden");
                        drop(stream);
                        (hooks.status)(ConnectionStatus::Closed, None);
                        if !wait_for_resume(&mut signals).await {
                            return;
                        }
                        continue 'reconnect;
                    }
                }
                step = next_step(&mut stream, options.heartbeat_timeout) => {
                    match step {
                        StreamStep::Event(event) => handle_event(event, &options, &hooks),
                        StreamStep::StreamError(err) => {
                            warn!(%err, "push stream error");
                            (hooks.status)(ConnectionStatus::Retrying, Some(err.to_string()));
                            break;
                        }
                        StreamStep::Ended => {
                            debug!("push stream ended by server");
                            (hooks.status)(ConnectionStatus::Retrying, None);
                            break;
                        }
                        StreamStep::HeartbeatLost => {
                            warn!(timeout = ?options.heartbeat_timeout, "push heartbeat lost");
                            (hooks.status)(
                                ConnectionStatus::Retrying,
                                Some("heartbeat timeout".to_string()),
                            );
                            break;
                        }
                    }
                }
            }
        }

        if !backoff_pause(&options, &mut attempt, &mut signals, &hooks).await {
            return;
        }
    }
}

/// Sleep out the backoff delay for the next attempt, waking early on a
/// connectivity/focus signal. `false` means the attempt cap is reached
/// and the connection stays closed.
async fn backoff_pause(
    options: &PushOptions,
    attempt: &mut u32,
    signals: &mut broadcast::Receiver<HostSignal>,
    hooks: &PushHooks,
) -> bool {
    *attempt += 1;
    if *attempt > options.backoff.max_attempts {
        warn!(attempts = *attempt - 1, "push reconnect attempts exhausted");
        (hooks.status)(
            ConnectionStatus::Closed,
            Some("reconnect attempts exhausted".to_string()),
        );
        return false;
    }

    let delay = options.backoff.delay(*attempt);
    debug!(?delay, attempt = *attempt, "push reconnect backoff");
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = wake_signal(signals) => {
            debug!("push backoff cut short by host signal");
        }
    }
    true
}

fn handle_event(
    event: PushEvent,
    options: &PushOptions,
    hooks: &PushHooks,
) {
    if let Some(filter) = &options.event_name {
        if event.event != *filter {
            return;
        }
    }

    let payload: Value = match serde_json::from_slice(&event.data) {
        Ok(value) => value,
        Err(err) => {
            // Log and ignore; one bad payload must not break the stream
            let parse_error = ParseError {
                event: event.event.clone(),
                reason: err.to_string(),
            };
            warn!(%parse_error, "dropping unparseable push event");
            return;
        }
    };

    let items = match payload {
        Value::Array(items) => items,
        single => vec![single],
    };

    (hooks.apply)(PushBatch {
        mode: options.mode,
        dedupe_key: options.dedupe_key.clone(),
        max_items: options.max_items,
        items,
    });
}
