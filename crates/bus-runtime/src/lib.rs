//! # Bus Runtime Library
//!
//! Exposes the runtime wiring for tests. The entry point is the `main.rs`
//! binary.

pub mod config;
pub mod runtime;

pub use config::RuntimeConfig;
pub use runtime::BusRuntime;
