//! # Bus Error Types

use shared_types::PeerRole;
use thiserror::Error;

/// Failures reported by a transport adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// There is no session to publish into.
    #[error("transport session closed")]
    SessionClosed,

    /// The channel is not currently connected.
    #[error("transport not connected")]
    NotConnected,

    /// Frame exceeded the channel's hard size limit.
    #[error("frame of {size} bytes exceeds limit {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    /// The underlying channel refused the publish.
    #[error("publish rejected: {0}")]
    Rejected(String),
}

/// Encoding or decoding failures of bus frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("payload serialization failed: {0}")]
    Serialize(String),

    #[error("frame is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("malformed chunk envelope: {0}")]
    MalformedChunk(String),

    #[error("unsupported chunk encoding {0:?}")]
    UnsupportedEncoding(String),

    #[error("chunk data is not valid base64: {0}")]
    InvalidBase64(String),

    #[error("payload needs {needed} chunks, limit is {limit}")]
    TooManyChunks { needed: usize, limit: usize },

    #[error("payload limit {limit} leaves no room for chunk data")]
    PayloadLimitTooSmall { limit: usize },
}

/// Error taxonomy of the bus boundary.
///
/// Callers normally see these folded into a [`crate::SendOutcome`]; the enum
/// exists so the reason is typed wherever it is logged or inspected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// No session; terminal, never retried.
    #[error("transport unavailable")]
    TransportUnavailable,

    /// Transient; the message was queued.
    #[error("transport not connected")]
    NotConnected,

    /// The required peer role is not in the roster; the message was queued.
    #[error("required peer role {0} not present")]
    PeerNotPresent(PeerRole),

    /// A publish step failed; the message was requeued.
    #[error("publish failed: {0}")]
    PublishFailed(#[from] TransportError),

    /// Inbound bytes could not be decoded; dropped.
    #[error("decode failed: {0}")]
    DecodeFailed(#[from] CodecError),
}
