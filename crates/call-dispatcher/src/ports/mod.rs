//! Ports of the call dispatcher.
//!
//! - `tool` - what a registered tool must implement

pub mod tool;
