//! # Shared Types Crate
//!
//! Types that cross the boundary between the bus, the call dispatcher and
//! whatever sits on top of them.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: call messages are defined once here and
//!   serialized with the exact field names peers expect on the wire.
//! - **No Ambient State**: time and identity are passed in explicitly
//!   (`TimeSource`, `CallId`), never read from globals inside the domain.

pub mod calls;
pub mod errors;
pub mod peer;
pub mod time;

pub use calls::*;
pub use errors::*;
pub use peer::*;
pub use time::{ManualTimeSource, SystemTimeSource, TimeSource, Timestamp};
