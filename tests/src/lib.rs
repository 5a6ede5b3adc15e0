//! # Presence Bus Test Suite
//!
//! Cross-crate tests: the bus, the call dispatcher and the call client
//! wired together over the loopback transport.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── harness.rs     # Loopback room with a user and an agent side
//!     ├── flows.rs       # End-to-end call and delivery flows
//!     └── properties.rs  # Bounded sizes under randomized load
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p bus-tests
//!
//! # Benchmarks
//! cargo bench -p bus-tests
//! ```

#![allow(dead_code)]

pub mod integration;
