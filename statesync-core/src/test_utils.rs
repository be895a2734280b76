//! Shared test doubles
//!
//! Deterministic stand-ins for the host-provided interfaces: a scripted
//! transport with per-reply delays (paused-clock friendly), an
//! in-memory durable backing with switchable write failures, and small
//! response builders. Exposed to downstream crates behind the
//! `test-utils` feature.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;

use crate::errors::QuotaError;
use crate::errors::TransportError;
use crate::transport::Transport;
use crate::transport::TransportRequest;
use crate::transport::TransportResponse;

/// Build a JSON reply.
pub fn json_response(
    status: u16,
    body: Value,
) -> TransportResponse {
    TransportResponse {
        status,
        body: Bytes::from(serde_json::to_vec(&body).expect("serializable body")),
    }
}

struct ScriptedReply {
    delay: Duration,
    outcome: std::result::Result<TransportResponse, TransportError>,
}

/// A transport that replays scripted replies in order and records every
/// request it saw. An unscripted call fails loudly.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_json(
        &self,
        status: u16,
        body: Value,
    ) {
        self.push_delayed(Duration::ZERO, status, body);
    }

    /// Schedule a reply that suspends for `delay` first; with a paused
    /// clock this models an in-flight request deterministically.
    pub fn push_delayed(
        &self,
        delay: Duration,
        status: u16,
        body: Value,
    ) {
        self.scripts.lock().push_back(ScriptedReply {
            delay,
            outcome: Ok(json_response(status, body)),
        });
    }

    pub fn push_error(
        &self,
        error: TransportError,
    ) {
        self.scripts.lock().push_back(ScriptedReply {
            delay: Duration::ZERO,
            outcome: Err(error),
        });
    }

    /// Requests seen so far, in order.
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        request: TransportRequest,
    ) -> std::result::Result<TransportResponse, TransportError> {
        self.requests.lock().push(request.clone());
        let reply = self.scripts.lock().pop_front();
        match reply {
            None => panic!("unscripted transport call: {} {}", request.method.as_str(), request.url),
            Some(reply) => {
                if !reply.delay.is_zero() {
                    tokio::time::sleep(reply.delay).await;
                }
                reply.outcome
            }
        }
    }
}

/// `localStorage`-shaped in-memory backing; writes can be made to fail
/// to exercise quota handling.
#[derive(Default)]
pub struct MemoryBacking {
    entries: Mutex<HashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryBacking {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(
        &self,
        fail: bool,
    ) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// The raw stored payload, for assertions.
    pub fn raw(
        &self,
        key: &str,
    ) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }
}

impl crate::adapter::durable::DurableBacking for MemoryBacking {
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
    ) -> std::result::Result<(), QuotaError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(QuotaError {
                key: key.to_string(),
                reason: "quota exceeded".to_string(),
            });
        }
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
