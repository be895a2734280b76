//! Per-store status and its host-event monitor
//!
//! Each store owns one [`StatusMonitor`]: the holder of the
//! [`StoreStatus`] record and the bridge to host lifecycle signals
//! (connectivity, focus, visibility) delivered over a broadcast channel.
//!
//! Status subscribers are deliberately separate from data subscribers:
//! a status flip never causes a data re-render unless the consumer
//! explicitly subscribed to status.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::Mutex;
use parking_lot::RwLock;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::trace;

use crate::bus::SubscriberBus;
use crate::bus::Subscription;

/// Host lifecycle signals the monitor (and the push adapter) react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSignal {
    Online,
    Offline,
    FocusGained,
    Hidden,
}

/// Lifecycle of a store's push connection. Stays [`Idle`] when no push
/// adapter is configured.
///
/// [`Idle`]: ConnectionStatus::Idle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Idle,
    Connecting,
    Open,
    Retrying,
    Closed,
}

/// The consumer-visible store status record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StoreStatus {
    /// An initial fetch is in flight
    pub is_loading: bool,
    /// A background refresh of already-served data is in flight
    pub is_revalidating: bool,
    /// Host reported loss of connectivity
    pub is_offline: bool,
    /// Last operation failure; cleared by the next successful `get`
    pub error: Option<String>,
    /// Epoch milliseconds of the last successful mutation or fetch;
    /// `0` means never fetched
    pub last_updated: u64,
    /// Push-stream lifecycle
    pub connection: ConnectionStatus,
}

/// A partial status update, merged by [`StatusMonitor::set_status`].
#[derive(Debug, Clone, Default)]
pub struct StatusPatch {
    loading: Option<bool>,
    revalidating: Option<bool>,
    offline: Option<bool>,
    error: Option<Option<String>>,
    last_updated: Option<u64>,
    connection: Option<ConnectionStatus>,
}

impl StatusPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loading(
        mut self,
        value: bool,
    ) -> Self {
        self.loading = Some(value);
        self
    }

    pub fn revalidating(
        mut self,
        value: bool,
    ) -> Self {
        self.revalidating = Some(value);
        self
    }

    pub fn offline(
        mut self,
        value: bool,
    ) -> Self {
        self.offline = Some(value);
        self
    }

    pub fn error(
        mut self,
        value: Option<String>,
    ) -> Self {
        self.error = Some(value);
        self
    }

    pub fn last_updated(
        mut self,
        value: u64,
    ) -> Self {
        self.last_updated = Some(value);
        self
    }

    pub fn connection(
        mut self,
        value: ConnectionStatus,
    ) -> Self {
        self.connection = Some(value);
        self
    }
}

/// Reload triggers derived from host signals and timers.
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    /// Re-run the last read on an offline→online transition
    pub reload_on_reconnect: bool,
    /// Re-run the last read when the host regains focus
    pub reload_on_focus: bool,
    /// Re-run the last read on a repeating timer
    pub reload_interval: Option<Duration>,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            reload_on_reconnect: true,
            reload_on_focus: false,
            reload_interval: None,
        }
    }
}

/// Store-provided reload trigger. Captures its own "last parameters
/// used" and schedules the actual async work itself.
pub type ReloadFn = Arc<dyn Fn() + Send + Sync>;

struct StatusShared {
    status: RwLock<StoreStatus>,
    subscribers: SubscriberBus,
}

/// Owns a store's [`StoreStatus`] and its host-signal listeners.
pub struct StatusMonitor {
    shared: Arc<StatusShared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl StatusMonitor {
    /// Spawn the monitor's listener tasks.
    ///
    /// Must run inside a tokio runtime (store builders are the only
    /// callers). The signal task updates `is_offline` on connectivity
    /// edges regardless of options; `reload` fires per the options.
    pub fn spawn(
        signals: broadcast::Receiver<HostSignal>,
        options: MonitorOptions,
        reload: ReloadFn,
    ) -> Self {
        let shared = Arc::new(StatusShared {
            status: RwLock::new(StoreStatus::default()),
            subscribers: SubscriberBus::new(),
        });

        let mut tasks = Vec::new();

        {
            let shared = shared.clone();
            let reload = reload.clone();
            let options = options.clone();
            let mut signals = signals;
            tasks.push(tokio::spawn(async move {
                while let Ok(signal) = signals.recv().await {
                    trace!(?signal, "host signal");
                    match signal {
                        HostSignal::Offline => {
                            Self::merge(&shared, StatusPatch::new().offline(true));
                        }
                        HostSignal::Online => {
                            let was_offline = shared.status.read().is_offline;
                            Self::merge(&shared, StatusPatch::new().offline(false));
                            if was_offline && options.reload_on_reconnect {
                                debug!("reconnected, reloading");
                                reload();
                            }
                        }
                        HostSignal::FocusGained => {
                            if options.reload_on_focus {
                                debug!("focus regained, reloading");
                                reload();
                            }
                        }
                        HostSignal::Hidden => {}
                    }
                }
            }));
        }

        if let Some(period) = options.reload_interval {
            let reload = reload.clone();
            tasks.push(tokio::spawn(async move {
                let start = tokio::time::Instant::now() + period;
                let mut ticker = tokio::time::interval_at(start, period);
                loop {
                    ticker.tick().await;
                    trace!("interval reload");
                    reload();
                }
            }));
        }

        Self {
            shared,
            tasks: Mutex::new(tasks),
            disposed: AtomicBool::new(false),
        }
    }

    /// Current status snapshot.
    pub fn status(&self) -> StoreStatus {
        self.shared.status.read().clone()
    }

    /// Merge a partial update and fire every status subscriber.
    pub fn set_status(
        &self,
        patch: StatusPatch,
    ) {
        Self::merge(&self.shared, patch);
    }

    fn merge(
        shared: &StatusShared,
        patch: StatusPatch,
    ) {
        {
            let mut status = shared.status.write();
            if let Some(v) = patch.loading {
                status.is_loading = v;
            }
            if let Some(v) = patch.revalidating {
                status.is_revalidating = v;
            }
            if let Some(v) = patch.offline {
                status.is_offline = v;
            }
            if let Some(v) = patch.error {
                status.error = v;
            }
            if let Some(v) = patch.last_updated {
                status.last_updated = v;
            }
            if let Some(v) = patch.connection {
                status.connection = v;
            }
        }
        shared.subscribers.notify_root();
    }

    /// Register a status-only listener.
    pub fn subscribe(
        &self,
        listener: impl Fn() + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.subscribers.subscribe(crate::path::Path::root(), listener)
    }

    /// Detach host listeners and cancel timers. Safe to call any number
    /// of times.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        debug!("status monitor disposed");
    }
}

impl Drop for StatusMonitor {
    fn drop(&mut self) {
        self.dispose();
    }
}
