//! Pending call table.
//!
//! One record per admitted call id, from admission until the sweep (or the
//! completion fast path) removes it.
//!
//! ```text
//! pending ──→ executing ──→ completed
//!                      ├──→ failed     (handler raised)
//!                      └──→ error      (no handler, invalid request)
//! ```

use crate::domain::signature::CallSignature;
use serde::Serialize;
use shared_types::{CallId, Timestamp};
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

/// Lifecycle of a dispatched call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    Error,
}

impl CallStatus {
    /// Still pending or executing.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Executing)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Executing => write!(f, "executing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A call observed by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingCall {
    pub id: CallId,
    pub name: String,
    pub signature: CallSignature,
    pub status: CallStatus,
    /// Dispatcher clock at admission.
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub origin: String,
}

impl PendingCall {
    pub fn new(
        id: CallId,
        name: impl Into<String>,
        signature: CallSignature,
        origin: impl Into<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            signature,
            status: CallStatus::Pending,
            created_at: now,
            updated_at: now,
            origin: origin.into(),
        }
    }

    pub fn age(&self, now: Timestamp) -> u64 {
        now.saturating_sub(self.created_at)
    }
}

/// Calls by id.
#[derive(Debug, Default)]
pub struct PendingCallTable {
    calls: HashMap<CallId, PendingCall>,
}

impl PendingCallTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &CallId) -> bool {
        self.calls.contains_key(id)
    }

    pub fn get(&self, id: &CallId) -> Option<&PendingCall> {
        self.calls.get(id)
    }

    /// An active record with `signature` created within `window_ms`.
    pub fn find_active_by_signature(
        &self,
        signature: &CallSignature,
        now: Timestamp,
        window_ms: u64,
    ) -> Option<&PendingCall> {
        self.calls.values().find(|call| {
            call.status.is_active() && &call.signature == signature && call.age(now) <= window_ms
        })
    }

    pub fn insert(&mut self, call: PendingCall) {
        self.calls.insert(call.id.clone(), call);
    }

    /// Move a record to `status`. Returns `false` if the id is unknown
    /// (already swept).
    pub fn set_status(&mut self, id: &CallId, status: CallStatus, now: Timestamp) -> bool {
        match self.calls.get_mut(id) {
            Some(call) => {
                call.status = status;
                call.updated_at = now;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &CallId) -> Option<PendingCall> {
        self.calls.remove(id)
    }

    /// Remove every record older than `max_age_ms`, whatever its status.
    pub fn sweep(&mut self, now: Timestamp, max_age_ms: u64) -> Vec<PendingCall> {
        let expired: Vec<CallId> = self
            .calls
            .values()
            .filter(|call| call.age(now) > max_age_ms)
            .map(|call| call.id.clone())
            .collect();

        expired
            .iter()
            .filter_map(|id| self.calls.remove(id))
            .collect()
    }

    /// Purge the oldest records while over `max`.
    pub fn enforce_max(&mut self, max: usize) -> Vec<PendingCall> {
        if self.calls.len() <= max {
            return vec![];
        }

        let mut entries: Vec<(CallId, Timestamp)> = self
            .calls
            .values()
            .map(|call| (call.id.clone(), call.created_at))
            .collect();
        entries.sort_by_key(|(_, created_at)| *created_at);

        let to_remove = self.calls.len() - max;
        let purged: Vec<PendingCall> = entries
            .into_iter()
            .take(to_remove)
            .filter_map(|(id, _)| self.calls.remove(&id))
            .collect();

        warn!(
            purged = purged.len(),
            max_pending = max,
            "Purged oldest pending calls to enforce table limit"
        );
        purged
    }

    pub fn count_by_status(&self, status: CallStatus) -> usize {
        self.calls.values().filter(|c| c.status == status).count()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}
