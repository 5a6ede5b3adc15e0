//! # Outbound Queue
//!
//! Holds messages that could not be published yet: the channel was down,
//! the required peer was absent, or a publish attempt failed.
//!
//! ## Invariants
//!
//! - Entries older than the TTL are evicted before every drain.
//! - Length never exceeds capacity; the oldest entry (by `queued_at`) is
//!   evicted first.
//! - Entries put back after a flush keep their relative order and stay
//!   ahead of anything queued while the flush was running.

use serde_json::Value;
use shared_types::{PeerRole, Timestamp};
use std::collections::VecDeque;

/// A message waiting for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub topic: String,
    pub payload: Value,
    pub queued_at: Timestamp,
    /// Role that must be present in the roster before publishing.
    pub requires_peer_role: Option<PeerRole>,
    /// Failed publish attempts so far.
    pub attempts: u32,
}

impl QueueEntry {
    pub fn new(
        topic: impl Into<String>,
        payload: Value,
        queued_at: Timestamp,
        requires_peer_role: Option<PeerRole>,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload,
            queued_at,
            requires_peer_role,
            attempts: 0,
        }
    }

    pub fn is_expired(&self, now: Timestamp, ttl_ms: u64) -> bool {
        now.saturating_sub(self.queued_at) > ttl_ms
    }

    pub fn age(&self, now: Timestamp) -> u64 {
        now.saturating_sub(self.queued_at)
    }
}

/// Bounded FIFO of undelivered messages.
#[derive(Debug)]
pub struct OutboundQueue {
    entries: VecDeque<QueueEntry>,
    capacity: usize,
    ttl_ms: u64,
}

impl OutboundQueue {
    pub fn new(capacity: usize, ttl_ms: u64) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            ttl_ms,
        }
    }

    /// Append an entry. Returns whatever had to be evicted to make room.
    pub fn push_back(&mut self, entry: QueueEntry, now: Timestamp) -> Vec<QueueEntry> {
        let mut evicted = self.evict_expired(now);
        self.entries.push_back(entry);
        evicted.extend(self.enforce_capacity());
        evicted
    }

    /// Put an entry back at the head (publish failed, retry it first).
    pub fn push_front(&mut self, entry: QueueEntry, now: Timestamp) -> Vec<QueueEntry> {
        let mut evicted = self.evict_expired(now);
        self.entries.push_front(entry);
        evicted.extend(self.enforce_capacity());
        evicted
    }

    /// Take every live entry for a flush. Expired entries are returned
    /// separately so the caller can log them.
    pub fn drain(&mut self, now: Timestamp) -> (Vec<QueueEntry>, Vec<QueueEntry>) {
        let expired = self.evict_expired(now);
        (self.entries.drain(..).collect(), expired)
    }

    /// Return deferred entries to the head, ahead of anything appended
    /// since the matching [`drain`](Self::drain).
    pub fn restore_front(&mut self, deferred: Vec<QueueEntry>) -> Vec<QueueEntry> {
        for entry in deferred.into_iter().rev() {
            self.entries.push_front(entry);
        }
        self.enforce_capacity()
    }

    /// Drop entries older than the TTL.
    pub fn evict_expired(&mut self, now: Timestamp) -> Vec<QueueEntry> {
        let ttl = self.ttl_ms;
        let mut expired = Vec::new();
        let mut kept = VecDeque::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            if entry.is_expired(now, ttl) {
                expired.push(entry);
            } else {
                kept.push_back(entry);
            }
        }
        self.entries = kept;
        expired
    }

    fn enforce_capacity(&mut self) -> Vec<QueueEntry> {
        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            let oldest = self
                .entries
                .iter()
                .enumerate()
                .min_by_key(|(_, entry)| entry.queued_at)
                .map(|(index, _)| index);
            match oldest.and_then(|index| self.entries.remove(index)) {
                Some(entry) => evicted.push(entry),
                None => break,
            }
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate entries in delivery order.
    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }
}
