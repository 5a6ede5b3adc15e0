//! Integration flows across the bus, the dispatcher and the client.

pub mod harness;

mod flows;
mod properties;
