//! Domain types for the call dispatcher.
//!
//! Pure state: no tasks, no bus. Everything takes the current time as a
//! millisecond timestamp.

pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod pending;
pub mod signature;

pub use circuit_breaker::{BreakerStats, CircuitBreaker};
pub use config::{ClientConfig, DispatcherConfig};
pub use error::{DispatchError, Rejection};
pub use pending::{CallStatus, PendingCall, PendingCallTable};
pub use signature::CallSignature;
