//! # Shared Bus - Reliable Topic Bus over a Best-Effort Data Channel
//!
//! The transport underneath (a room data channel) is best effort: publishes
//! can fail or vanish, payloads are capped at tens of kilobytes, and some
//! messages only make sense once a particular peer (the agent) is present.
//! This crate turns that into a topic bus with typed outcomes.
//!
//! ## Layers
//!
//! ```text
//!  send_with_result(topic, payload)          subscribe(topic, handler)
//!            │                                         ↑
//!            ▼                                         │
//!   ┌─────────────────┐   disconnected /       ┌──────────────────┐
//!   │  Outbound Queue │ ← peer absent /        │ Chunk Reassembler│
//!   │  (FIFO, TTL,    │   publish failed       │ (per group, TTL) │
//!   │   capacity)     │                        └──────────────────┘
//!   └─────────────────┘                                 ↑
//!            │ flush on state / roster change           │
//!            ▼                                          │
//!   ┌─────────────────┐     frames ≤ max size    ┌──────────────┐
//!   │      Codec      │ ───────────────────────→ │  Transport   │
//!   └─────────────────┘                          └──────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - **Whole-or-nothing delivery:** a fragmented message reaches handlers
//!   only after every fragment arrived; partial groups are discarded after
//!   `CHUNK_TTL`.
//! - **No silent loss while offline:** sends during disconnect or peer
//!   absence are queued (bounded by `MAX_QUEUE_SIZE` and `QUEUE_ENTRY_TTL`)
//!   and flushed in FIFO order on the next state change.
//! - **One bus per session:** `BusRegistry` hands out the cached instance so
//!   listeners and queues are never duplicated.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod adapters;
pub mod bus;
pub mod codec;
pub mod config;
pub mod errors;
pub mod policy;
pub mod ports;
pub mod queue;
pub mod registry;
pub mod stats;
pub mod subscriber;

use std::time::Duration;

// Re-export main types
pub use adapters::loopback::{LoopbackHub, LoopbackTransport};
pub use bus::{Bus, FlushReport, SendOutcome, SendReason, SendStatus};
pub use codec::{ChunkEnvelope, ChunkReassembler, Codec, Frame};
pub use config::BusConfig;
pub use errors::{BusError, CodecError, TransportError};
pub use policy::{DeliveryPolicy, ManualDeliveryPolicy, NoPeerGating};
pub use ports::transport::{Transport, TransportEvent};
pub use queue::{OutboundQueue, QueueEntry};
pub use registry::BusRegistry;
pub use stats::{BusStats, BusStatsSnapshot};
pub use subscriber::{BusMessage, MessageStream, Subscription};

/// Hard payload ceiling per published frame, safely under common
/// data-channel limits.
pub const MAX_PAYLOAD_SIZE: usize = 60_000;

/// Maximum entries held in the outbound queue.
pub const MAX_QUEUE_SIZE: usize = 64;

/// Queued entries older than this are evicted.
pub const QUEUE_ENTRY_TTL: Duration = Duration::from_secs(60);

/// Partially received chunk groups older than this are discarded.
pub const CHUNK_TTL: Duration = Duration::from_secs(60);

/// Delay before retrying a flush after a publish failure.
pub const RETRY_FLUSH_DELAY: Duration = Duration::from_millis(500);

/// Publish attempts per queued entry before it is dropped.
pub const MAX_PUBLISH_ATTEMPTS: u32 = 5;

/// Interval of the background sweep over reassembly groups and the queue.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(15);

/// Maximum concurrently reassembling chunk groups.
pub const MAX_CHUNK_GROUPS: usize = 1024;

/// Maximum fragments accepted for a single group.
pub const MAX_CHUNKS_PER_GROUP: usize = 4096;

/// Capacity of the transport event channel used by adapters.
pub const DEFAULT_EVENT_CAPACITY: usize = 1000;
