//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for logging and metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name stamped on log lines.
    pub service_name: String,

    /// Log filter directive (`info`, `shared_bus=debug,warn`, ...).
    pub log_level: String,

    /// Whether to write logs to stdout at all.
    pub console_output: bool,

    /// JSON formatted logs instead of the human-readable format.
    pub json_logs: bool,

    /// Debug mode. Lowers the default filter to `debug`.
    pub debug: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "presence-bus".to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
            debug: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PB_SERVICE_NAME`: Service name (default: presence-bus)
    /// - `PB_LOG_LEVEL` or `RUST_LOG`: Log filter (default: info, debug when `PB_DEBUG` is set)
    /// - `PB_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `PB_JSON_LOGS`: Enable JSON logs (default: false outside containers)
    /// - `PB_DEBUG`: Debug mode (default: false)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let is_container =
            lookup("KUBERNETES_SERVICE_HOST").is_some() || lookup("DOCKER_CONTAINER").is_some();
        let debug = lookup("PB_DEBUG").map(|v| is_truthy(&v)).unwrap_or(false);

        Self {
            service_name: lookup("PB_SERVICE_NAME").unwrap_or_else(|| "presence-bus".to_string()),

            log_level: lookup("PB_LOG_LEVEL")
                .or_else(|| lookup("RUST_LOG"))
                .unwrap_or_else(|| if debug { "debug" } else { "info" }.to_string()),

            console_output: lookup("PB_CONSOLE_OUTPUT")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(true),

            json_logs: lookup("PB_JSON_LOGS")
                .map(|v| is_truthy(&v))
                .unwrap_or(is_container),

            debug,
        }
    }
}

pub(crate) fn is_truthy(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
