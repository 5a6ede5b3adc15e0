//! # Bus Configuration
//!
//! Every limit the bus enforces, with defaults taken from the crate
//! constants. Durations are converted to millisecond windows at the point of
//! use so domain code works on plain timestamps.

use crate::{
    CHUNK_TTL, MAX_CHUNKS_PER_GROUP, MAX_CHUNK_GROUPS, MAX_PUBLISH_ATTEMPTS, MAX_QUEUE_SIZE,
    QUEUE_ENTRY_TTL, RETRY_FLUSH_DELAY, SWEEP_INTERVAL,
};
use shared_types::ConfigError;
use std::time::Duration;

/// Upper bound for any configured queue capacity.
const QUEUE_SIZE_CEILING: usize = 10_000;

/// Configuration for a bus instance.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Maximum entries in the outbound queue (oldest evicted beyond this).
    pub max_queue_size: usize,
    /// Age after which a queued entry is evicted.
    pub queue_entry_ttl: Duration,
    /// Age after which a partially received chunk group is discarded.
    pub chunk_ttl: Duration,
    /// Overrides the transport's advertised frame limit when set.
    pub max_payload_size: Option<usize>,
    /// Delay before the retry flush that follows a publish failure.
    pub retry_flush_delay: Duration,
    /// Publish attempts per entry before it is dropped.
    pub max_publish_attempts: u32,
    /// Interval of the background TTL sweep.
    pub sweep_interval: Duration,
    /// Concurrent reassembly groups kept before oldest-first eviction.
    pub max_chunk_groups: usize,
    /// Fragments accepted per group.
    pub max_chunks_per_group: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_queue_size: MAX_QUEUE_SIZE,
            queue_entry_ttl: QUEUE_ENTRY_TTL,
            chunk_ttl: CHUNK_TTL,
            max_payload_size: None,
            retry_flush_delay: RETRY_FLUSH_DELAY,
            max_publish_attempts: MAX_PUBLISH_ATTEMPTS,
            sweep_interval: SWEEP_INTERVAL,
            max_chunk_groups: MAX_CHUNK_GROUPS,
            max_chunks_per_group: MAX_CHUNKS_PER_GROUP,
        }
    }
}

impl BusConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_queue_size == 0 {
            return Err(ConfigError::Zero {
                field: "max_queue_size",
            });
        }
        if self.max_queue_size > QUEUE_SIZE_CEILING {
            return Err(ConfigError::TooLarge {
                field: "max_queue_size",
                value: self.max_queue_size as u64,
                maximum: QUEUE_SIZE_CEILING as u64,
            });
        }
        if self.queue_entry_ttl.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "queue_entry_ttl",
            });
        }
        if self.chunk_ttl.is_zero() {
            return Err(ConfigError::ZeroDuration { field: "chunk_ttl" });
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "sweep_interval",
            });
        }
        if self.max_publish_attempts == 0 {
            return Err(ConfigError::Zero {
                field: "max_publish_attempts",
            });
        }
        if self.max_chunk_groups == 0 {
            return Err(ConfigError::Zero {
                field: "max_chunk_groups",
            });
        }
        if self.max_chunks_per_group == 0 {
            return Err(ConfigError::Zero {
                field: "max_chunks_per_group",
            });
        }
        if self.max_payload_size == Some(0) {
            return Err(ConfigError::Zero {
                field: "max_payload_size",
            });
        }
        Ok(())
    }

    pub(crate) fn queue_entry_ttl_ms(&self) -> u64 {
        self.queue_entry_ttl.as_millis() as u64
    }

    pub(crate) fn chunk_ttl_ms(&self) -> u64 {
        self.chunk_ttl.as_millis() as u64
    }
}
