//! # Transport Adapters
//!
//! - `loopback` - in-process room shared by several endpoints, used by the
//!   runtime demo and by tests to inject disconnects, roster changes and
//!   publish failures.

pub mod loopback;
