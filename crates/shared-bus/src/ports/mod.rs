//! # Ports
//!
//! Outbound port the bus drives: the underlying data channel.

pub mod transport;
