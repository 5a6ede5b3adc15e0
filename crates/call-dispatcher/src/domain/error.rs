//! Dispatcher error types.

use serde::Serialize;
use thiserror::Error;

/// Failure of an admitted call. Always reported to the caller as a Call
/// Error; never propagated into the bus.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// No tool is registered under the requested name.
    #[error("Tool not found: {0}")]
    HandlerNotFound(String),

    /// The tool ran and raised an error.
    #[error("Tool execution failed: {0}")]
    HandlerException(String),

    /// The request could not be understood.
    #[error("Invalid call request: {0}")]
    InvalidRequest(String),
}

/// Why an inbound request was dropped at admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    /// Same id already in the pending table.
    DuplicateId,
    /// Same signature in flight within the duplicate window.
    DuplicateSignature,
    /// Same signature completed within the breaker cooldown.
    CoolingDown,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DuplicateId => "duplicate_id",
            Self::DuplicateSignature => "duplicate_signature",
            Self::CoolingDown => "cooling_down",
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
