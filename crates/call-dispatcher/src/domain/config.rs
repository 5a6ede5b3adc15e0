//! Dispatcher and client configuration.

use crate::{
    CIRCUIT_BREAKER_COOLDOWN, DEBUG_SWEEP_INTERVAL, DEFAULT_CALL_TIMEOUT, DUPLICATE_WINDOW,
    MAX_PENDING_CALLS, PENDING_MAX_AGE, SWEEP_INTERVAL,
};
use shared_types::{ConfigError, TOOL_CALL_TOPIC, TOOL_ERROR_TOPIC, TOOL_RESULT_TOPIC};
use std::time::Duration;

/// Call dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Topic carrying call requests.
    pub request_topic: String,
    /// Topic for successful results.
    pub result_topic: String,
    /// Topic for call errors.
    pub error_topic: String,
    /// Pending records older than this are swept regardless of status.
    pub pending_max_age: Duration,
    /// Window during which a completed signature is not executed again.
    /// Zero disables the breaker.
    pub breaker_cooldown: Duration,
    /// Window in which an in-flight record with the same signature makes a
    /// new request a duplicate.
    pub duplicate_window: Duration,
    /// Sweep interval in normal operation.
    pub sweep_interval: Duration,
    /// Debug mode: faster sweep and more verbose admission logging.
    pub debug: bool,
    /// Remove completed records right after publishing their result when
    /// the breaker is enabled.
    pub release_on_completion: bool,
    /// Upper bound on records kept in the pending table.
    pub max_pending_calls: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            request_topic: TOOL_CALL_TOPIC.to_string(),
            result_topic: TOOL_RESULT_TOPIC.to_string(),
            error_topic: TOOL_ERROR_TOPIC.to_string(),
            pending_max_age: PENDING_MAX_AGE,
            breaker_cooldown: CIRCUIT_BREAKER_COOLDOWN,
            duplicate_window: DUPLICATE_WINDOW,
            sweep_interval: SWEEP_INTERVAL,
            debug: false,
            release_on_completion: true,
            max_pending_calls: MAX_PENDING_CALLS,
        }
    }
}

impl DispatcherConfig {
    /// Create a debug configuration.
    pub fn for_debug() -> Self {
        Self {
            debug: true,
            ..Self::default()
        }
    }

    /// Interval actually used by the sweep task.
    pub fn effective_sweep_interval(&self) -> Duration {
        if self.debug {
            DEBUG_SWEEP_INTERVAL.min(self.sweep_interval)
        } else {
            self.sweep_interval
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_topic.is_empty() {
            return Err(ConfigError::Zero {
                field: "request_topic",
            });
        }
        if self.pending_max_age.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "pending_max_age",
            });
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "sweep_interval",
            });
        }
        if self.max_pending_calls == 0 {
            return Err(ConfigError::Zero {
                field: "max_pending_calls",
            });
        }
        Ok(())
    }

    pub(crate) fn pending_max_age_ms(&self) -> u64 {
        self.pending_max_age.as_millis() as u64
    }

    pub(crate) fn breaker_cooldown_ms(&self) -> u64 {
        self.breaker_cooldown.as_millis() as u64
    }

    pub(crate) fn duplicate_window_ms(&self) -> u64 {
        self.duplicate_window.as_millis() as u64
    }
}

/// Caller-side configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub request_topic: String,
    pub result_topic: String,
    pub error_topic: String,
    /// Timeout used when a call does not specify one.
    pub default_timeout: Duration,
    /// Interval of the sweep over abandoned correlations.
    pub sweep_interval: Duration,
    /// Identity stamped into requests as `origin`.
    pub origin: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_topic: TOOL_CALL_TOPIC.to_string(),
            result_topic: TOOL_RESULT_TOPIC.to_string(),
            error_topic: TOOL_ERROR_TOPIC.to_string(),
            default_timeout: DEFAULT_CALL_TIMEOUT,
            sweep_interval: DEBUG_SWEEP_INTERVAL,
            origin: String::new(),
        }
    }
}

impl ClientConfig {
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "default_timeout",
            });
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "sweep_interval",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DispatcherConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.request_topic, "tool_call");
        assert_eq!(config.effective_sweep_interval(), Duration::from_secs(30));
        assert_eq!(config.breaker_cooldown_ms(), 30_000);
        assert_eq!(config.duplicate_window_ms(), 3_000);
    }

    #[test]
    fn test_debug_sweeps_faster() {
        let config = DispatcherConfig::for_debug();
        assert_eq!(config.effective_sweep_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_max_age_rejected() {
        let config = DispatcherConfig {
            pending_max_age: Duration::ZERO,
            ..DispatcherConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroDuration {
                field: "pending_max_age"
            })
        ));
    }

    #[test]
    fn test_client_defaults() {
        let config = ClientConfig::default().with_origin("user-1");
        assert!(config.validate().is_ok());
        assert_eq!(config.origin, "user-1");
        assert_eq!(config.default_timeout, Duration::from_secs(30));
    }
}
