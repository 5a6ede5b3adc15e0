//! # Bus Facade
//!
//! Combines the codec, the outbound queue and a transport into one handle.
//! Each bus owns a background worker that:
//!
//! - decodes inbound frames, reassembles chunk groups and dispatches whole
//!   messages to topic handlers,
//! - flushes the outbound queue when the connection comes up or the roster
//!   changes,
//! - periodically sweeps expired chunk groups and queue entries.
//!
//! A second task drains fire-and-forget sends from a channel one at a time,
//! so [`Bus::send`] calls go out in call order.
//!
//! Instances are obtained from [`crate::BusRegistry`], which guarantees one
//! bus per transport session.

use crate::codec::{ChunkAccept, ChunkReassembler, Codec, Frame, ReassemblyConfig};
use crate::config::BusConfig;
use crate::errors::{BusError, CodecError, TransportError};
use crate::policy::DeliveryPolicy;
use crate::ports::transport::{Transport, TransportEvent};
use crate::queue::{OutboundQueue, QueueEntry};
use crate::stats::{BusStats, BusStatsSnapshot};
use crate::subscriber::{BusMessage, MessageStream, Subscription, SubscriptionTable};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared_types::{roster_has_role, ConnectionState, SessionId, TimeSource};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

/// Final disposition of a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendStatus {
    /// Every frame was published.
    Sent,
    /// Held in the outbound queue for a later flush.
    Queued,
    /// Dropped; will not be retried.
    Failed,
}

/// Why a send was not published immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendReason {
    TransportUnavailable,
    NotConnected,
    PeerNotPresent,
    PublishRetryQueued,
    EncodeFailed,
}

impl SendReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransportUnavailable => "transport_unavailable",
            Self::NotConnected => "not_connected",
            Self::PeerNotPresent => "peer_not_present",
            Self::PublishRetryQueued => "publish_retry_queued",
            Self::EncodeFailed => "encode_failed",
        }
    }
}

impl fmt::Display for SendReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`Bus::send_with_result`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
    pub status: SendStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<SendReason>,
    /// Queue length right after the message was queued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_length: Option<usize>,
}

impl SendOutcome {
    pub fn sent() -> Self {
        Self {
            status: SendStatus::Sent,
            reason: None,
            queue_length: None,
        }
    }

    pub fn queued(reason: SendReason, queue_length: usize) -> Self {
        Self {
            status: SendStatus::Queued,
            reason: Some(reason),
            queue_length: Some(queue_length),
        }
    }

    pub fn failed(reason: SendReason) -> Self {
        Self {
            status: SendStatus::Failed,
            reason: Some(reason),
            queue_length: None,
        }
    }

    pub fn is_sent(&self) -> bool {
        self.status == SendStatus::Sent
    }

    pub fn is_queued(&self) -> bool {
        self.status == SendStatus::Queued
    }
}

/// What one flush pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub published: usize,
    /// Put back for a later flush (peer absent or publish failed).
    pub deferred: usize,
    /// Given up on (attempts exhausted or unencodable).
    pub dropped: usize,
}

/// Handle to the bus of one transport session. Cheap to clone.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

struct BusInner {
    transport: Arc<dyn Transport>,
    codec: Codec,
    config: BusConfig,
    policy: Arc<dyn DeliveryPolicy>,
    time: Arc<dyn TimeSource>,
    queue: Mutex<OutboundQueue>,
    reassembler: Mutex<ChunkReassembler>,
    subscriptions: Arc<SubscriptionTable>,
    /// Serializes flush passes so queued entries keep their order.
    flush_lock: tokio::sync::Mutex<()>,
    retry_scheduled: AtomicBool,
    stats: BusStats,
    outbound: mpsc::UnboundedSender<Outbound>,
    worker: Mutex<Option<JoinHandle<()>>>,
    sender: Mutex<Option<JoinHandle<()>>>,
}

/// A fire-and-forget send waiting for the outbound task.
struct Outbound {
    topic: String,
    payload: Value,
}

impl Bus {
    /// Build a bus over `transport` and start its worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub(crate) fn start(
        transport: Arc<dyn Transport>,
        config: BusConfig,
        policy: Arc<dyn DeliveryPolicy>,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        let max_payload_size = config
            .max_payload_size
            .unwrap_or_else(|| transport.max_payload_size());
        let codec = Codec::new(max_payload_size).with_max_chunks(config.max_chunks_per_group);
        let reassembler = ChunkReassembler::new(ReassemblyConfig {
            chunk_ttl_ms: config.chunk_ttl_ms(),
            max_groups: config.max_chunk_groups,
            max_chunks_per_group: config.max_chunks_per_group,
        });
        let queue = OutboundQueue::new(config.max_queue_size, config.queue_entry_ttl_ms());
        let events = transport.subscribe_events();
        let sweep_interval = config.sweep_interval;
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(BusInner {
            transport,
            codec,
            config,
            policy,
            time,
            queue: Mutex::new(queue),
            reassembler: Mutex::new(reassembler),
            subscriptions: Arc::new(SubscriptionTable::default()),
            flush_lock: tokio::sync::Mutex::new(()),
            retry_scheduled: AtomicBool::new(false),
            stats: BusStats::default(),
            outbound,
            worker: Mutex::new(None),
            sender: Mutex::new(None),
        });

        let handle = tokio::spawn(run_worker(Arc::downgrade(&inner), events, sweep_interval));
        *inner.worker.lock() = Some(handle);
        let handle = tokio::spawn(run_outbound(Arc::downgrade(&inner), outbound_rx));
        *inner.sender.lock() = Some(handle);

        info!(
            session = %inner.transport.session_id(),
            max_payload_size,
            "Bus started"
        );
        Self { inner }
    }

    pub fn session_id(&self) -> SessionId {
        self.inner.transport.session_id()
    }

    /// Send and report what happened.
    pub async fn send_with_result(&self, topic: &str, payload: Value) -> SendOutcome {
        self.inner.send(topic, payload).await
    }

    /// Serialize `message` and send it.
    pub async fn send_json<T: Serialize>(&self, topic: &str, message: &T) -> SendOutcome {
        match serde_json::to_value(message) {
            Ok(payload) => self.send_with_result(topic, payload).await,
            Err(e) => {
                BusStats::incr(&self.inner.stats.failed);
                error!(topic = %topic, error = %e, "Message serialization failed");
                SendOutcome::failed(SendReason::EncodeFailed)
            }
        }
    }

    /// Fire and forget. The outcome is logged, never returned.
    ///
    /// Sends from one bus are processed in call order.
    pub fn send(&self, topic: &str, payload: Value) {
        let message = Outbound {
            topic: topic.to_string(),
            payload,
        };
        if self.inner.outbound.send(message).is_err() {
            BusStats::incr(&self.inner.stats.failed);
            warn!(topic = %topic, "Bus stopped, fire-and-forget send dropped");
        }
    }

    /// Register `handler` for every whole message on `topic`.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> Subscription
    where
        F: Fn(BusMessage) + Send + Sync + 'static,
    {
        Subscription::register(&self.inner.subscriptions, topic, Arc::new(handler))
    }

    /// Buffered, pull-style subscription to `topic`.
    pub fn subscribe_stream(&self, topic: &str) -> MessageStream {
        MessageStream::register(&self.inner.subscriptions, topic)
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.subscriptions.subscriber_count(topic)
    }

    /// Publish whatever the queue holds, if the channel is up.
    pub async fn flush(&self) -> FlushReport {
        self.inner.flush().await
    }

    /// Run one TTL sweep now.
    pub fn sweep(&self) {
        self.inner.sweep();
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Topics of queued entries in delivery order.
    pub fn queued_topics(&self) -> Vec<String> {
        self.inner
            .queue
            .lock()
            .iter()
            .map(|e| e.topic.clone())
            .collect()
    }

    pub fn pending_chunk_groups(&self) -> usize {
        self.inner.reassembler.lock().len()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.transport.connection_state()
    }

    pub fn stats(&self) -> BusStatsSnapshot {
        self.inner
            .stats
            .snapshot(self.queue_len(), self.pending_chunk_groups())
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Whether both handles refer to the same bus.
    pub fn same_bus(&self, other: &Bus) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Stop the worker and the outbound task. Queued messages are discarded
    /// with the bus.
    pub(crate) fn shutdown(&self) {
        for task in [&self.inner.worker, &self.inner.sender] {
            if let Some(handle) = task.lock().take() {
                handle.abort();
            }
        }
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("session", &self.inner.transport.session_id())
            .field("queue_len", &self.queue_len())
            .finish()
    }
}

impl BusInner {
    async fn send(self: &Arc<Self>, topic: &str, payload: Value) -> SendOutcome {
        if !self.transport.has_session() {
            BusStats::incr(&self.stats.failed);
            warn!(topic = %topic, error = %BusError::TransportUnavailable, "Message dropped");
            return SendOutcome::failed(SendReason::TransportUnavailable);
        }

        let now = self.time.now_ms();
        let required = self.policy.required_peer_role(topic, &payload);
        if let Some(role) = &required {
            if !roster_has_role(&self.transport.peers(), role) {
                let reason = BusError::PeerNotPresent(role.clone());
                let len = self.enqueue(QueueEntry::new(topic, payload, now, required.clone()), false);
                info!(topic = %topic, reason = %reason, queue_length = len, "Message queued");
                return SendOutcome::queued(SendReason::PeerNotPresent, len);
            }
        }

        if !self.transport.connection_state().is_connected() {
            let len = self.enqueue(QueueEntry::new(topic, payload, now, required), false);
            debug!(topic = %topic, reason = %BusError::NotConnected, queue_length = len, "Message queued");
            return SendOutcome::queued(SendReason::NotConnected, len);
        }

        let frames = match self.codec.encode(&payload) {
            Ok(frames) => frames,
            Err(e) => {
                BusStats::incr(&self.stats.failed);
                error!(topic = %topic, error = %e, "Message encoding failed");
                return SendOutcome::failed(SendReason::EncodeFailed);
            }
        };

        match self.publish_frames(topic, frames).await {
            Ok(()) => {
                BusStats::incr(&self.stats.sent);
                trace!(topic = %topic, "Message sent");
                SendOutcome::sent()
            }
            Err(e) => {
                let mut entry = QueueEntry::new(topic, payload, now, required);
                entry.attempts = 1;
                let len = self.enqueue(entry, true);
                let error = BusError::PublishFailed(e);
                warn!(topic = %topic, error = %error, queue_length = len, "Message requeued");
                self.schedule_retry();
                SendOutcome::queued(SendReason::PublishRetryQueued, len)
            }
        }
    }

    fn enqueue(&self, entry: QueueEntry, front: bool) -> usize {
        let now = self.time.now_ms();
        let (evicted, len) = {
            let mut queue = self.queue.lock();
            let evicted = if front {
                queue.push_front(entry, now)
            } else {
                queue.push_back(entry, now)
            };
            (evicted, queue.len())
        };
        BusStats::incr(&self.stats.queued);
        self.record_evictions(&evicted, "Queue entries evicted");
        len
    }

    fn record_evictions(&self, evicted: &[QueueEntry], what: &'static str) {
        if evicted.is_empty() {
            return;
        }
        BusStats::add(&self.stats.queue_evictions, evicted.len());
        let topics: Vec<&str> = evicted.iter().map(|e| e.topic.as_str()).collect();
        warn!(count = evicted.len(), topics = ?topics, "{}", what);
    }

    async fn publish_frames(&self, topic: &str, frames: Vec<Vec<u8>>) -> Result<(), TransportError> {
        let count = frames.len();
        for frame in frames {
            self.transport.publish(topic, frame).await?;
            BusStats::incr(&self.stats.frames_published);
        }
        if count > 1 {
            BusStats::add(&self.stats.chunks_published, count);
            debug!(topic = %topic, chunks = count, "Chunked message published");
        }
        Ok(())
    }

    /// Arrange a single delayed flush after a publish failure.
    fn schedule_retry(self: &Arc<Self>) {
        if self.retry_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let weak = Arc::downgrade(self);
        let delay = self.config.retry_flush_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.retry_scheduled.store(false, Ordering::Release);
            let report = inner.flush().await;
            debug!(?report, "Retry flush finished");
        });
    }

    async fn flush(self: &Arc<Self>) -> FlushReport {
        let _guard = self.flush_lock.lock().await;
        let mut report = FlushReport::default();

        if !self.transport.has_session() || !self.transport.connection_state().is_connected() {
            return report;
        }

        let now = self.time.now_ms();
        let (entries, expired) = self.queue.lock().drain(now);
        self.record_evictions(&expired, "Expired queue entries dropped");
        if entries.is_empty() {
            return report;
        }

        let roster = self.transport.peers();
        let mut deferred = Vec::new();
        let mut remaining = entries.into_iter();

        while let Some(mut entry) = remaining.next() {
            if let Some(role) = &entry.requires_peer_role {
                if !roster_has_role(&roster, role) {
                    deferred.push(entry);
                    continue;
                }
            }

            let frames = match self.codec.encode(&entry.payload) {
                Ok(frames) => frames,
                Err(e) => {
                    BusStats::incr(&self.stats.failed);
                    error!(topic = %entry.topic, error = %e, "Queued message unencodable, dropped");
                    report.dropped += 1;
                    continue;
                }
            };

            match self.publish_frames(&entry.topic, frames).await {
                Ok(()) => {
                    BusStats::incr(&self.stats.sent);
                    BusStats::incr(&self.stats.flushed);
                    report.published += 1;
                }
                Err(e) => {
                    entry.attempts += 1;
                    if entry.attempts >= self.config.max_publish_attempts {
                        BusStats::incr(&self.stats.failed);
                        error!(
                            topic = %entry.topic,
                            attempts = entry.attempts,
                            error = %e,
                            "Publish attempts exhausted, message dropped"
                        );
                        report.dropped += 1;
                    } else {
                        warn!(topic = %entry.topic, attempts = entry.attempts, error = %e, "Flush publish failed");
                        deferred.push(entry);
                    }
                    deferred.extend(remaining.by_ref());
                    self.schedule_retry();
                    break;
                }
            }
        }

        report.deferred = deferred.len();
        let evicted = self.queue.lock().restore_front(deferred);
        self.record_evictions(&evicted, "Queue entries evicted");

        if report.published > 0 || report.dropped > 0 {
            info!(
                published = report.published,
                deferred = report.deferred,
                dropped = report.dropped,
                "Outbound queue flushed"
            );
        }
        report
    }

    fn sweep(&self) {
        let now = self.time.now_ms();
        let expired_groups = self.reassembler.lock().gc_expired(now);
        if !expired_groups.is_empty() {
            BusStats::add(&self.stats.chunk_groups_evicted, expired_groups.len());
            warn!(count = expired_groups.len(), "Incomplete chunk groups discarded");
        }
        let evicted = self.queue.lock().evict_expired(now);
        self.record_evictions(&evicted, "Expired queue entries dropped");
    }

    fn handle_frame(&self, topic: String, bytes: &[u8], sender: Option<String>) {
        if !self.subscriptions.has_subscribers(&topic) {
            trace!(topic = %topic, "No subscribers, frame ignored");
            return;
        }
        let payload = match self.decode_frame(&topic, bytes) {
            Ok(Some(payload)) => payload,
            Ok(None) => return,
            Err(e) => {
                BusStats::incr(&self.stats.decode_failures);
                warn!(topic = %topic, error = %BusError::DecodeFailed(e), "Inbound frame dropped");
                return;
            }
        };
        BusStats::incr(&self.stats.delivered);
        self.subscriptions.dispatch(&BusMessage {
            topic,
            payload,
            sender,
        });
    }

    fn decode_frame(&self, topic: &str, bytes: &[u8]) -> Result<Option<Value>, CodecError> {
        let envelope = match Codec::decode(bytes)? {
            Frame::Message(payload) => return Ok(Some(payload)),
            Frame::Chunk(envelope) => envelope,
        };
        let group = envelope.id.clone();
        let now = self.time.now_ms();
        let outcome = self.reassembler.lock().accept(topic, envelope, now)?;
        match outcome {
            ChunkAccept::Complete(bytes) => Codec::parse_payload(&bytes).map(Some),
            ChunkAccept::Incomplete { received, total } => {
                trace!(topic = %topic, group = %group, received, total, "Chunk buffered");
                Ok(None)
            }
            ChunkAccept::Duplicate => {
                debug!(topic = %topic, group = %group, "Duplicate chunk ignored");
                Ok(None)
            }
            ChunkAccept::Discarded => {
                debug!(topic = %topic, group = %group, "Chunk for evicted group discarded");
                Ok(None)
            }
        }
    }
}

impl Drop for BusInner {
    fn drop(&mut self) {
        for task in [self.worker.get_mut(), self.sender.get_mut()] {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}

async fn run_outbound(inner: Weak<BusInner>, mut outbound: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(Outbound { topic, payload }) = outbound.recv().await {
        let Some(bus) = inner.upgrade() else { break };
        let outcome = bus.send(&topic, payload).await;
        if outcome.status == SendStatus::Failed {
            warn!(topic = %topic, reason = ?outcome.reason, "Fire-and-forget send failed");
        }
    }
    debug!("Outbound task stopped");
}

async fn run_worker(
    inner: Weak<BusInner>,
    mut events: broadcast::Receiver<TransportEvent>,
    sweep_interval: Duration,
) {
    let mut sweep = tokio::time::interval(sweep_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    sweep.tick().await;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(inner) = inner.upgrade() else { break };
                match event {
                    Ok(TransportEvent::Received { topic, bytes, sender }) => {
                        inner.handle_frame(topic, &bytes, sender);
                    }
                    Ok(TransportEvent::ConnectionStateChanged(state)) => {
                        info!(state = %state, "Transport connection state changed");
                        if state.is_connected() {
                            spawn_flush(&inner);
                        }
                    }
                    Ok(TransportEvent::PeersChanged) => {
                        debug!("Peer roster changed");
                        spawn_flush(&inner);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Bus worker lagged behind transport events");
                        spawn_flush(&inner);
                    }
                    Err(RecvError::Closed) => {
                        debug!("Transport event channel closed");
                        break;
                    }
                }
            }
            _ = sweep.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                inner.sweep();
            }
        }
    }
}

fn spawn_flush(inner: &Arc<BusInner>) {
    if inner.queue.lock().is_empty() {
        return;
    }
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        inner.flush().await;
    });
}
