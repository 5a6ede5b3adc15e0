//! # Loopback Transport
//!
//! An in-process room. Every endpoint created from a [`LoopbackHub`] shares
//! the hub's session and connection state; a frame published by one endpoint
//! is delivered to every other endpoint that is currently present.
//!
//! Failure injection:
//!
//! - [`LoopbackHub::set_connection_state`] simulates drops and reconnects.
//! - [`LoopbackTransport::set_present`] makes a peer join or leave.
//! - [`LoopbackTransport::fail_next_publishes`] rejects upcoming publishes.
//! - [`LoopbackHub::close`] ends the session for good.

use crate::errors::TransportError;
use crate::ports::transport::{Transport, TransportEvent};
use crate::{DEFAULT_EVENT_CAPACITY, MAX_PAYLOAD_SIZE};
use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::{ConnectionState, PeerInfo, SessionId};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Shared state of one loopback room.
pub struct LoopbackHub {
    session: SessionId,
    state: Mutex<ConnectionState>,
    open: AtomicBool,
    endpoints: Mutex<Vec<Weak<LoopbackTransport>>>,
    max_payload_size: usize,
}

impl LoopbackHub {
    /// A connected room with the default frame limit.
    pub fn new(session: SessionId) -> Arc<Self> {
        Self::with_limits(session, ConnectionState::Connected, MAX_PAYLOAD_SIZE)
    }

    pub fn with_limits(
        session: SessionId,
        state: ConnectionState,
        max_payload_size: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            session,
            state: Mutex::new(state),
            open: AtomicBool::new(true),
            endpoints: Mutex::new(Vec::new()),
            max_payload_size,
        })
    }

    /// Convenience: a connected room with two present endpoints.
    pub fn pair(
        session: SessionId,
        left: PeerInfo,
        right: PeerInfo,
    ) -> (Arc<Self>, Arc<LoopbackTransport>, Arc<LoopbackTransport>) {
        let hub = Self::new(session);
        let a = hub.endpoint(left);
        let b = hub.endpoint(right);
        (hub, a, b)
    }

    /// Join the room as `peer`. The endpoint starts out present.
    pub fn endpoint(self: &Arc<Self>, peer: PeerInfo) -> Arc<LoopbackTransport> {
        let (events, _) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
        let endpoint = Arc::new(LoopbackTransport {
            hub: Arc::clone(self),
            peer,
            present: AtomicBool::new(true),
            events,
            fail_next: AtomicUsize::new(0),
            published: Mutex::new(Vec::new()),
        });

        {
            let mut endpoints = self.endpoints.lock();
            endpoints.retain(|e| e.strong_count() > 0);
            endpoints.push(Arc::downgrade(&endpoint));
        }
        self.notify_others(&endpoint.peer.identity, TransportEvent::PeersChanged);
        debug!(session = %self.session, identity = %endpoint.peer.identity, "Loopback endpoint joined");
        endpoint
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Move every endpoint to `state` and notify them.
    pub fn set_connection_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.lock(), state);
        if previous == state {
            return;
        }
        info!(session = %self.session, from = %previous, to = %state, "Loopback connection state changed");
        for endpoint in self.live_endpoints() {
            endpoint.emit(TransportEvent::ConnectionStateChanged(state));
        }
    }

    /// End the session. Subsequent publishes fail with `SessionClosed`.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
        self.set_connection_state(ConnectionState::Disconnected);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn live_endpoints(&self) -> Vec<Arc<LoopbackTransport>> {
        self.endpoints
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    fn notify_others(&self, identity: &str, event: TransportEvent) {
        for endpoint in self.live_endpoints() {
            if endpoint.peer.identity != identity {
                endpoint.emit(event.clone());
            }
        }
    }
}

/// One participant of a [`LoopbackHub`].
pub struct LoopbackTransport {
    hub: Arc<LoopbackHub>,
    peer: PeerInfo,
    present: AtomicBool,
    events: broadcast::Sender<TransportEvent>,
    fail_next: AtomicUsize,
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl LoopbackTransport {
    pub fn identity(&self) -> &str {
        &self.peer.identity
    }

    pub fn hub(&self) -> &Arc<LoopbackHub> {
        &self.hub
    }

    /// Join or leave the roster seen by the other endpoints.
    pub fn set_present(&self, present: bool) {
        if self.present.swap(present, Ordering::AcqRel) == present {
            return;
        }
        info!(identity = %self.peer.identity, present, "Loopback peer presence changed");
        self.hub
            .notify_others(&self.peer.identity, TransportEvent::PeersChanged);
    }

    pub fn is_present(&self) -> bool {
        self.present.load(Ordering::Acquire)
    }

    /// Reject the next `n` publishes from this endpoint.
    pub fn fail_next_publishes(&self, n: usize) {
        self.fail_next.store(n, Ordering::Release);
    }

    /// Frames successfully published by this endpoint, in order.
    pub fn published_frames(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().clone()
    }

    pub fn published_count(&self) -> usize {
        self.published.lock().len()
    }

    /// Deliver raw bytes to this endpoint as if a peer had published them.
    pub fn inject(&self, topic: &str, bytes: Vec<u8>, sender: Option<String>) {
        self.emit(TransportEvent::Received {
            topic: topic.to_string(),
            bytes,
            sender,
        });
    }

    fn emit(&self, event: TransportEvent) {
        // No receivers just means no bus is attached yet.
        let _ = self.events.send(event);
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn session_id(&self) -> SessionId {
        self.hub.session.clone()
    }

    fn has_session(&self) -> bool {
        self.hub.is_open()
    }

    fn connection_state(&self) -> ConnectionState {
        self.hub.connection_state()
    }

    fn peers(&self) -> Vec<PeerInfo> {
        self.hub
            .live_endpoints()
            .into_iter()
            .filter(|e| e.peer.identity != self.peer.identity && e.is_present())
            .map(|e| e.peer.clone())
            .collect()
    }

    fn max_payload_size(&self) -> usize {
        self.hub.max_payload_size
    }

    async fn publish(&self, topic: &str, bytes: Vec<u8>) -> Result<(), TransportError> {
        if !self.hub.is_open() {
            return Err(TransportError::SessionClosed);
        }
        if !self.hub.connection_state().is_connected() {
            return Err(TransportError::NotConnected);
        }
        if self.take_injected_failure() {
            return Err(TransportError::Rejected("injected failure".into()));
        }
        if bytes.len() > self.hub.max_payload_size {
            return Err(TransportError::PayloadTooLarge {
                size: bytes.len(),
                limit: self.hub.max_payload_size,
            });
        }

        self.published
            .lock()
            .push((topic.to_string(), bytes.clone()));

        for endpoint in self.hub.live_endpoints() {
            if endpoint.peer.identity != self.peer.identity && endpoint.is_present() {
                endpoint.emit(TransportEvent::Received {
                    topic: topic.to_string(),
                    bytes: bytes.clone(),
                    sender: Some(self.peer.identity.clone()),
                });
            }
        }
        Ok(())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}
