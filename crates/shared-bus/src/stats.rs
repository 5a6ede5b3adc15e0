//! # Bus Statistics
//!
//! Monotonic counters updated from the hot path with relaxed atomics.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters for one bus.
#[derive(Debug, Default)]
pub struct BusStats {
    pub sent: AtomicU64,
    pub queued: AtomicU64,
    pub failed: AtomicU64,
    pub frames_published: AtomicU64,
    pub chunks_published: AtomicU64,
    pub flushed: AtomicU64,
    pub queue_evictions: AtomicU64,
    pub delivered: AtomicU64,
    pub decode_failures: AtomicU64,
    pub chunk_groups_evicted: AtomicU64,
}

/// Point-in-time copy of [`BusStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BusStatsSnapshot {
    pub sent: u64,
    pub queued: u64,
    pub failed: u64,
    pub frames_published: u64,
    pub chunks_published: u64,
    pub flushed: u64,
    pub queue_evictions: u64,
    pub delivered: u64,
    pub decode_failures: u64,
    pub chunk_groups_evicted: u64,
    pub queue_length: u64,
    pub pending_chunk_groups: u64,
}

impl BusStats {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self, queue_length: usize, pending_chunk_groups: usize) -> BusStatsSnapshot {
        BusStatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            frames_published: self.frames_published.load(Ordering::Relaxed),
            chunks_published: self.chunks_published.load(Ordering::Relaxed),
            flushed: self.flushed.load(Ordering::Relaxed),
            queue_evictions: self.queue_evictions.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            chunk_groups_evicted: self.chunk_groups_evicted.load(Ordering::Relaxed),
            queue_length: queue_length as u64,
            pending_chunk_groups: pending_chunk_groups as u64,
        }
    }
}
