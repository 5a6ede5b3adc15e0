//! Completion circuit breaker.
//!
//! Remembers when each call signature last completed. While a signature is
//! inside its cooldown the breaker is open for it and replays are rejected
//! without creating a pending record; once the cooldown elapses the
//! signature is accepted again.
//!
//! ```text
//!   completed ──record──→ OPEN (reject) ──cooldown elapsed──→ CLOSED (accept)
//! ```
//!
//! A zero cooldown disables the breaker.

use crate::domain::signature::CallSignature;
use parking_lot::RwLock;
use shared_types::Timestamp;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Signature → last completion time.
pub struct CircuitBreaker {
    completed: RwLock<HashMap<CallSignature, Timestamp>>,
    cooldown_ms: u64,
    total_recorded: AtomicU64,
    total_rejected: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(cooldown_ms: u64) -> Self {
        Self {
            completed: RwLock::new(HashMap::new()),
            cooldown_ms,
            total_recorded: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.cooldown_ms > 0
    }

    /// Whether `signature` may execute at `now`.
    ///
    /// Returns `false` while the signature is cooling down. An elapsed entry
    /// is dropped on the way.
    pub fn should_allow(&self, signature: &CallSignature, now: Timestamp) -> bool {
        if !self.is_enabled() {
            return true;
        }

        let mut completed = self.completed.write();
        let Some(&completed_at) = completed.get(signature) else {
            return true;
        };

        let elapsed = now.saturating_sub(completed_at);
        if elapsed < self.cooldown_ms {
            self.total_rejected.fetch_add(1, Ordering::Relaxed);
            debug!(
                signature = signature.short(),
                remaining_ms = self.cooldown_ms - elapsed,
                "Circuit breaker open, rejecting replay"
            );
            return false;
        }

        completed.remove(signature);
        info!(signature = signature.short(), "Circuit breaker closed after cooldown");
        true
    }

    /// Remember that `signature` completed at `now`.
    pub fn record_completion(&self, signature: &CallSignature, now: Timestamp) {
        if !self.is_enabled() {
            return;
        }
        self.completed.write().insert(signature.clone(), now);
        self.total_recorded.fetch_add(1, Ordering::Relaxed);
        debug!(signature = signature.short(), "Circuit breaker opened for signature");
    }

    /// Milliseconds left in the signature's cooldown, if any.
    pub fn remaining_cooldown(&self, signature: &CallSignature, now: Timestamp) -> Option<u64> {
        let completed = self.completed.read();
        let completed_at = *completed.get(signature)?;
        let elapsed = now.saturating_sub(completed_at);
        (elapsed < self.cooldown_ms).then(|| self.cooldown_ms - elapsed)
    }

    /// Forget entries whose cooldown elapsed. Returns how many were dropped.
    pub fn prune(&self, now: Timestamp) -> usize {
        let cooldown = self.cooldown_ms;
        let mut completed = self.completed.write();
        let before = completed.len();
        completed.retain(|_, completed_at| now.saturating_sub(*completed_at) < cooldown);
        before - completed.len()
    }

    /// Forget one signature.
    pub fn reset(&self, signature: &CallSignature) {
        if self.completed.write().remove(signature).is_some() {
            info!(signature = signature.short(), "Circuit breaker manually reset");
        }
    }

    pub fn len(&self) -> usize {
        self.completed.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.completed.read().is_empty()
    }

    pub fn get_stats(&self) -> BreakerStats {
        BreakerStats {
            open_signatures: self.len(),
            cooldown_ms: self.cooldown_ms,
            total_recorded: self.total_recorded.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
        }
    }
}

/// Statistics for the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerStats {
    pub open_signatures: usize,
    pub cooldown_ms: u64,
    pub total_recorded: u64,
    pub total_rejected: u64,
}

impl serde::Serialize for BreakerStats {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("BreakerStats", 4)?;
        state.serialize_field("open_signatures", &self.open_signatures)?;
        state.serialize_field("cooldown_ms", &self.cooldown_ms)?;
        state.serialize_field("total_recorded", &self.total_recorded)?;
        state.serialize_field("total_rejected", &self.total_rejected)?;
        state.end()
    }
}
