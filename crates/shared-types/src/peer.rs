//! # Peers and Sessions
//!
//! What the transport tells us about the room we are in: its connection
//! state and who else is present.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an underlying transport session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// A role a remote participant can play (e.g. `agent`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerRole(String);

impl PeerRole {
    /// The AI agent participant.
    pub const AGENT: &'static str = "agent";

    pub fn new(role: impl Into<String>) -> Self {
        Self(role.into())
    }

    pub fn agent() -> Self {
        Self::new(Self::AGENT)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One entry of the transport's peer roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub identity: String,
    /// Role hints advertised by the peer (metadata, kind, ...).
    #[serde(default)]
    pub roles: Vec<PeerRole>,
}

impl PeerInfo {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            roles: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: PeerRole) -> Self {
        self.roles.push(role);
        self
    }

    /// Whether this peer plays `role`.
    ///
    /// Matches an explicit role hint, or an identity prefixed by the role
    /// name (`agent-7f3c` plays `agent`).
    pub fn has_role(&self, role: &PeerRole) -> bool {
        if self.roles.iter().any(|r| r == role) {
            return true;
        }
        let identity = self.identity.to_ascii_lowercase();
        let name = role.as_str().to_ascii_lowercase();
        identity == name
            || identity
                .strip_prefix(&name)
                .is_some_and(|rest| rest.starts_with(['-', '_', ':', '.']))
    }
}

/// Whether any peer in `roster` plays `role`.
pub fn roster_has_role(roster: &[PeerInfo], role: &PeerRole) -> bool {
    roster.iter().any(|peer| peer.has_role(role))
}
