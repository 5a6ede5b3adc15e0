//! # Call Client
//!
//! Caller side of the call protocol: publishes a [`CallRequest`] and waits
//! for the matching Call Result or Call Error, correlated by `callId`.
//!
//! Each in-flight call holds a oneshot sender in a correlation table. A
//! periodic sweep resolves abandoned entries as timed out.

use crate::domain::ClientConfig;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use shared_bus::{Bus, BusMessage, SendReason, SendStatus, Subscription};
use shared_types::{
    CallError, CallId, CallRequest, CallResult, ConfigError, SystemTimeSource, TimeSource,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Why a call produced no result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallFailure {
    /// The bus dropped the request.
    #[error("call request could not be sent: {0}")]
    Undeliverable(SendReason),

    /// The dispatcher answered with a Call Error.
    #[error("{0}")]
    Remote(String),

    /// No answer arrived in time.
    #[error("call timed out")]
    Timeout,
}

type Reply = Result<Value, CallFailure>;

struct PendingReply {
    sender: oneshot::Sender<Reply>,
    deadline: Instant,
}

/// Client counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClientStatsSnapshot {
    pub issued: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub unmatched: u64,
    pub pending: u64,
}

#[derive(Debug, Default)]
struct ClientStats {
    issued: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    unmatched: AtomicU64,
}

/// Issues calls over a bus. Cheap to clone.
#[derive(Clone)]
pub struct CallClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    bus: Bus,
    config: ClientConfig,
    time: Arc<dyn TimeSource>,
    pending: Mutex<HashMap<CallId, PendingReply>>,
    stats: ClientStats,
    subscriptions: Mutex<Vec<Subscription>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl CallClient {
    /// Subscribe to the result and error topics. Must be called from within
    /// a Tokio runtime.
    pub fn new(bus: Bus, config: ClientConfig) -> Result<Self, ConfigError> {
        Self::with_time_source(bus, config, Arc::new(SystemTimeSource))
    }

    pub fn with_time_source(
        bus: Bus,
        config: ClientConfig,
        time: Arc<dyn TimeSource>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let inner = Arc::new(ClientInner {
            bus,
            config,
            time,
            pending: Mutex::new(HashMap::new()),
            stats: ClientStats::default(),
            subscriptions: Mutex::new(Vec::new()),
            sweeper: Mutex::new(None),
        });

        let on_result = Arc::downgrade(&inner);
        let on_error = Arc::downgrade(&inner);
        let subscriptions = vec![
            inner.bus.subscribe(&inner.config.result_topic, move |message| {
                if let Some(inner) = on_result.upgrade() {
                    inner.on_result(message);
                }
            }),
            inner.bus.subscribe(&inner.config.error_topic, move |message| {
                if let Some(inner) = on_error.upgrade() {
                    inner.on_error(message);
                }
            }),
        ];
        *inner.subscriptions.lock() = subscriptions;

        let handle = tokio::spawn(sweep_task(
            Arc::downgrade(&inner),
            inner.config.sweep_interval,
        ));
        *inner.sweeper.lock() = Some(handle);

        Ok(Self { inner })
    }

    /// Call `name` and wait up to the configured default timeout.
    pub async fn call(&self, name: &str, args: Value) -> Result<Value, CallFailure> {
        self.call_with_timeout(name, args, self.inner.config.default_timeout)
            .await
    }

    /// Call `name` and wait up to `timeout`.
    ///
    /// A request the bus queues still counts as issued; the wait covers the
    /// time it spends in the queue.
    pub async fn call_with_timeout(
        &self,
        name: &str,
        args: Value,
        timeout: Duration,
    ) -> Result<Value, CallFailure> {
        let request = CallRequest::new(
            name,
            args,
            self.inner.config.origin.as_str(),
            self.inner.time.now_ms(),
        );
        self.issue(request, timeout).await
    }

    /// Send a prepared request and wait for its answer.
    pub async fn issue(&self, request: CallRequest, timeout: Duration) -> Result<Value, CallFailure> {
        let id = request.id.clone();
        let receiver = self.inner.register(id.clone(), timeout);
        self.inner.stats.issued.fetch_add(1, Ordering::Relaxed);

        let outcome = self
            .inner
            .bus
            .send_json(&self.inner.config.request_topic, &request)
            .await;
        if outcome.status == SendStatus::Failed {
            self.inner.pending.lock().remove(&id);
            let reason = outcome.reason.unwrap_or(SendReason::TransportUnavailable);
            warn!(call_id = %id, tool = %request.name(), reason = %reason, "Call request not sent");
            return Err(CallFailure::Undeliverable(reason));
        }
        debug!(call_id = %id, tool = %request.name(), status = ?outcome.status, "Call request issued");

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(reply)) => reply,
            // Sender dropped by the sweep.
            Ok(Err(_)) => Err(CallFailure::Timeout),
            Err(_) => {
                if self.inner.pending.lock().remove(&id).is_some() {
                    self.inner.stats.timed_out.fetch_add(1, Ordering::Relaxed);
                }
                Err(CallFailure::Timeout)
            }
        }
    }

    /// Stop listening for replies. Calls still waiting resolve as timed out.
    pub fn shutdown(&self) {
        self.inner.subscriptions.lock().clear();
        if let Some(handle) = self.inner.sweeper.lock().take() {
            handle.abort();
        }
        let abandoned: Vec<PendingReply> = self
            .inner
            .pending
            .lock()
            .drain()
            .map(|(_, reply)| reply)
            .collect();
        for reply in abandoned {
            let _ = reply.sender.send(Err(CallFailure::Timeout));
        }
    }

    /// Resolve expired correlations as timed out.
    pub fn remove_expired(&self) -> usize {
        self.inner.remove_expired()
    }

    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> ClientStatsSnapshot {
        let s = &self.inner.stats;
        ClientStatsSnapshot {
            issued: s.issued.load(Ordering::Relaxed),
            completed: s.completed.load(Ordering::Relaxed),
            failed: s.failed.load(Ordering::Relaxed),
            timed_out: s.timed_out.load(Ordering::Relaxed),
            unmatched: s.unmatched.load(Ordering::Relaxed),
            pending: self.pending_len() as u64,
        }
    }
}

impl ClientInner {
    fn register(&self, id: CallId, timeout: Duration) -> oneshot::Receiver<Reply> {
        let (sender, receiver) = oneshot::channel();
        let deadline = Instant::now() + timeout;
        self.pending
            .lock()
            .insert(id, PendingReply { sender, deadline });
        receiver
    }

    fn on_result(&self, message: BusMessage) {
        match message.decode::<CallResult>() {
            Ok(result) => {
                if self.complete(&result.call_id, Ok(result.result)) {
                    self.stats.completed.fetch_add(1, Ordering::Relaxed);
                    debug!(call_id = %result.call_id, elapsed_ms = result.execution_time_ms, "Call result received");
                }
            }
            Err(e) => warn!(error = %e, "Undecodable call result"),
        }
    }

    fn on_error(&self, message: BusMessage) {
        match message.decode::<CallError>() {
            Ok(error) => {
                if self.complete(&error.call_id, Err(CallFailure::Remote(error.error))) {
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    debug!(call_id = %error.call_id, "Call error received");
                }
            }
            Err(e) => warn!(error = %e, "Undecodable call error"),
        }
    }

    fn complete(&self, call_id: &CallId, reply: Reply) -> bool {
        let Some(pending) = self.pending.lock().remove(call_id) else {
            // Another caller's call, or one that already timed out.
            self.stats.unmatched.fetch_add(1, Ordering::Relaxed);
            debug!(call_id = %call_id, "Reply for unknown call ignored");
            return false;
        };
        if pending.sender.send(reply).is_err() {
            debug!(call_id = %call_id, "Caller gone before reply arrived");
        }
        true
    }

    fn remove_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<PendingReply> = {
            let mut pending = self.pending.lock();
            let ids: Vec<CallId> = pending
                .iter()
                .filter(|(_, reply)| reply.deadline <= now)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| pending.remove(id)).collect()
        };

        let count = expired.len();
        for reply in expired {
            let _ = reply.sender.send(Err(CallFailure::Timeout));
        }
        self.stats
            .timed_out
            .fetch_add(count as u64, Ordering::Relaxed);
        count
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

async fn sweep_task(inner: Weak<ClientInner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let removed = inner.remove_expired();
        if removed > 0 {
            debug!(removed, "Cleaned up expired call correlations");
        }
    }
}
