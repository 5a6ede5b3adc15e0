//! # Presence Bus Runtime
//!
//! Runs an in-process loopback room with the call dispatcher on the agent
//! side and a demo caller on the user side.
//!
//! ```text
//!   CallClient ──tool_call──→ user bus ══ loopback ══ agent bus ──→ CallDispatcher
//!       ↑                                                                │
//!       └──────────────── tool_result / tool_error ←─────────────────────┘
//! ```
//!
//! Configuration comes from `PB_*` environment variables; see
//! [`RuntimeConfig::from_env`] and `bus_telemetry::TelemetryConfig::from_env`.

use anyhow::{Context, Result};
use tracing::info;

use bus_runtime::{BusRuntime, RuntimeConfig};
use bus_telemetry::{encode_metrics, init_telemetry, TelemetryConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = TelemetryConfig::from_env();
    init_telemetry(&telemetry).context("failed to initialize telemetry")?;

    let mut config = RuntimeConfig::from_env().context("failed to load runtime configuration")?;
    config.dispatcher.debug |= telemetry.debug;

    let runtime = BusRuntime::new(config)?;
    runtime.start();
    runtime.spawn_demo();

    info!("Runtime is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    runtime.shutdown().await;

    let metrics = encode_metrics().context("failed to encode metrics")?;
    info!(bytes = metrics.len(), "Final metrics encoded");
    println!("{metrics}");

    Ok(())
}
