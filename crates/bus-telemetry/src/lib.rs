//! # Bus Telemetry
//!
//! Logging and metrics for the presence bus.
//!
//! ## Components
//!
//! - **Logging**: a global `tracing` subscriber, human-readable or JSON
//! - **Metrics**: Prometheus gauges mirrored from bus, dispatcher and client
//!   stats snapshots, plus a text encoder for scraping
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bus_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_telemetry(&TelemetryConfig::from_env())?;
//!     // ...
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `PB_LOG_LEVEL` / `RUST_LOG` | `info` | Log filter |
//! | `PB_JSON_LOGS` | `false` | JSON log lines |
//! | `PB_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `PB_DEBUG` | `false` | Debug mode |
//! | `PB_SERVICE_NAME` | `presence-bus` | Service name in logs |

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::{env_filter, init_logging};
pub use metrics::{
    encode_metrics, forget_session, mirror_stats, register_metrics, HistogramTimer, BUS_SESSIONS,
    BUS_STATS, CALLS, CALL_ROUND_TRIP, CLIENT_STATS, DISPATCHER_STATS,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Register metrics, then install the log subscriber.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    register_metrics()?;
    init_logging(config)
}

/// Convenience macro for recording a metric increment.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}
