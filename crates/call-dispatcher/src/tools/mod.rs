//! Tools shipped with the dispatcher.

pub mod builtin;

pub use builtin::{register_builtins, DoNothing, Echo};
