//! # Transport Port
//!
//! The contract any networking layer must satisfy to carry the bus. Session
//! establishment is the adapter's business; the bus only sees the state,
//! the roster, a topic-scoped publish and a stream of events.

use crate::errors::TransportError;
use crate::MAX_PAYLOAD_SIZE;
use async_trait::async_trait;
use shared_types::{ConnectionState, PeerInfo, SessionId};
use tokio::sync::broadcast;

/// Something that happened on the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Bytes arrived on a topic.
    Received {
        topic: String,
        bytes: Vec<u8>,
        /// Identity of the publishing peer, when the transport knows it.
        sender: Option<String>,
    },
    /// The connection state moved.
    ConnectionStateChanged(ConnectionState),
    /// A peer joined or left.
    PeersChanged,
}

/// Best-effort, size-bounded, topic-scoped byte transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Stable identifier of the session this transport is bound to.
    fn session_id(&self) -> SessionId;

    /// Whether a session exists at all. `false` is terminal.
    fn has_session(&self) -> bool;

    /// Current connection state.
    fn connection_state(&self) -> ConnectionState;

    /// Current remote peers.
    fn peers(&self) -> Vec<PeerInfo>;

    /// Largest frame the channel accepts.
    fn max_payload_size(&self) -> usize {
        MAX_PAYLOAD_SIZE
    }

    /// Publish one frame on `topic`.
    async fn publish(&self, topic: &str, bytes: Vec<u8>) -> Result<(), TransportError>;

    /// Subscribe to transport events.
    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent>;
}
