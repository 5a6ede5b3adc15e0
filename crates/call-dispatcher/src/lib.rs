//! # Call Dispatcher - Remote Tool Calls over the Shared Bus
//!
//! Turns call requests arriving on the `tool_call` topic into tool
//! executions, and publishes the outcome on `tool_result` / `tool_error`.
//!
//! # Architecture
//!
//! ```text
//!   tool_call ──→ admission ──→ execution ──→ tool_result / tool_error
//!                   │  ▲            │
//!                   │  │            ▼
//!                   │  └──── circuit breaker (completed signatures)
//!                   ▼
//!            pending call table ←── periodic sweep (max age)
//! ```
//!
//! # Admission
//!
//! A request is silently dropped when, in order:
//!
//! 1. its `id` is already in the pending table,
//! 2. another pending or executing record with the same `{name, args}`
//!    signature was created within `DUPLICATE_WINDOW`,
//! 3. the same signature completed within `CIRCUIT_BREAKER_COOLDOWN`.
//!
//! # Usage
//!
//! ```ignore
//! use call_dispatcher::{CallDispatcher, DispatcherConfig, ToolRegistry};
//!
//! let mut registry = ToolRegistry::new();
//! call_dispatcher::tools::register_builtins(&mut registry);
//! let dispatcher = CallDispatcher::new(bus, Arc::new(registry), DispatcherConfig::default())?;
//! dispatcher.start();
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]
#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod client;
pub mod domain;
pub mod ports;
pub mod registry;
pub mod service;
pub mod tools;

use std::time::Duration;

pub use client::{CallClient, CallFailure, ClientStatsSnapshot};
pub use domain::{
    CallSignature, CallStatus, CircuitBreaker, ClientConfig, DispatchError, DispatcherConfig,
    PendingCall, PendingCallTable, Rejection,
};
pub use ports::tool::{FnTool, ToolError, ToolHandler};
pub use registry::{fuzzy_score, normalize_tool_name, ResolvedTool, ToolRegistry};
pub use service::{CallDispatcher, DispatcherStats, DispatcherStatsSnapshot};

/// Pending records older than this are swept regardless of status.
pub const PENDING_MAX_AGE: Duration = Duration::from_secs(30);

/// A completed signature is not executed again within this window.
pub const CIRCUIT_BREAKER_COOLDOWN: Duration = Duration::from_secs(30);

/// Window in which a second in-flight request with the same signature is a
/// duplicate.
pub const DUPLICATE_WINDOW: Duration = Duration::from_secs(3);

/// Pending-table sweep interval.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Pending-table sweep interval when debug mode is on.
pub const DEBUG_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound on records kept in the pending table.
pub const MAX_PENDING_CALLS: usize = 1024;

/// Default time a [`CallClient`] waits for a result.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
