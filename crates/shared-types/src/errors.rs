//! # Error Types
//!
//! Errors shared by more than one crate.

use thiserror::Error;

/// A configuration value is out of range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A size or count limit was zero.
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    /// A duration limit was zero.
    #[error("{field} must be a non-zero duration")]
    ZeroDuration { field: &'static str },

    /// A value exceeded its ceiling.
    #[error("{field} = {value} exceeds maximum {maximum}")]
    TooLarge {
        field: &'static str,
        value: u64,
        maximum: u64,
    },

    /// An environment variable could not be parsed.
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
}
