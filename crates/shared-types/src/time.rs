//! # Time Source
//!
//! All TTL and window arithmetic is done on millisecond timestamps supplied
//! through this port so domain logic can be tested without sleeping.

use parking_lot::Mutex;
use std::sync::Arc;

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Abstract clock.
pub trait TimeSource: Send + Sync {
    /// Current time in milliseconds.
    fn now_ms(&self) -> Timestamp;
}

/// Default time source using system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_ms(&self) -> Timestamp {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Hand-driven clock for tests and simulations.
#[derive(Debug, Clone, Default)]
pub struct ManualTimeSource {
    now: Arc<Mutex<Timestamp>>,
}

impl ManualTimeSource {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, millis: u64) {
        let mut now = self.now.lock();
        *now = now.saturating_add(millis);
    }

    pub fn set(&self, at: Timestamp) {
        *self.now.lock() = at;
    }
}

impl TimeSource for ManualTimeSource {
    fn now_ms(&self) -> Timestamp {
        *self.now.lock()
    }
}
