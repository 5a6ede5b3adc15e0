//! # Runtime Configuration
//!
//! Bus, dispatcher and client settings for the demo runtime, with
//! environment overrides. Every value not overridden keeps the library
//! default.

use anyhow::{Context, Result};
use call_dispatcher::{ClientConfig, DispatcherConfig};
use shared_bus::BusConfig;
use shared_types::ConfigError;
use std::str::FromStr;
use std::time::Duration;

/// Complete runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Session id of the loopback room.
    pub session: String,
    /// Identity of the calling side.
    pub user_identity: String,
    /// Identity of the side running the dispatcher.
    pub agent_identity: String,
    /// Bus configuration, shared by both sides.
    pub bus: BusConfig,
    /// Dispatcher configuration.
    pub dispatcher: DispatcherConfig,
    /// Client configuration.
    pub client: ClientConfig,
    /// How often stats are copied into the metrics gauges.
    pub stats_interval: Duration,
    /// Delay between demo calls.
    pub call_interval: Duration,
    /// Accept tool names within this similarity score.
    pub fuzzy_threshold: Option<f64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let user_identity = "user-1".to_string();
        Self {
            session: "demo-room".to_string(),
            client: ClientConfig::default().with_origin(user_identity.clone()),
            user_identity,
            agent_identity: "agent-1".to_string(),
            bus: BusConfig::default(),
            dispatcher: DispatcherConfig::default(),
            stats_interval: Duration::from_secs(10),
            call_interval: Duration::from_secs(5),
            fuzzy_threshold: None,
        }
    }
}

impl RuntimeConfig {
    /// Load from the process environment.
    ///
    /// # Environment Variables
    ///
    /// - `PB_SESSION`: loopback session id (default: demo-room)
    /// - `PB_DEBUG`: dispatcher debug mode
    /// - `PB_MAX_QUEUE_SIZE`: outbound queue capacity
    /// - `PB_QUEUE_TTL_SECS`: queued entry lifetime
    /// - `PB_CHUNK_TTL_SECS`: partial chunk group lifetime
    /// - `PB_MAX_PAYLOAD_SIZE`: frame size limit override
    /// - `PB_PENDING_MAX_AGE_SECS`: pending call lifetime
    /// - `PB_BREAKER_COOLDOWN_SECS`: completed-call cooldown, 0 disables
    /// - `PB_DUPLICATE_WINDOW_SECS`: in-flight duplicate window
    /// - `PB_CALL_TIMEOUT_SECS`: client call timeout
    /// - `PB_STATS_INTERVAL_SECS`: metrics mirroring interval
    /// - `PB_CALL_INTERVAL_SECS`: delay between demo calls
    /// - `PB_FUZZY_THRESHOLD`: enable fuzzy tool-name matching
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(session) = lookup("PB_SESSION") {
            config.session = session;
        }
        if let Some(debug) = lookup("PB_DEBUG") {
            config.dispatcher.debug = matches!(debug.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }

        if let Some(n) = parse(&lookup, "PB_MAX_QUEUE_SIZE")? {
            config.bus.max_queue_size = n;
        }
        if let Some(secs) = parse(&lookup, "PB_QUEUE_TTL_SECS")? {
            config.bus.queue_entry_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, "PB_CHUNK_TTL_SECS")? {
            config.bus.chunk_ttl = Duration::from_secs(secs);
        }
        if let Some(n) = parse(&lookup, "PB_MAX_PAYLOAD_SIZE")? {
            config.bus.max_payload_size = Some(n);
        }

        if let Some(secs) = parse(&lookup, "PB_PENDING_MAX_AGE_SECS")? {
            config.dispatcher.pending_max_age = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, "PB_BREAKER_COOLDOWN_SECS")? {
            config.dispatcher.breaker_cooldown = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, "PB_DUPLICATE_WINDOW_SECS")? {
            config.dispatcher.duplicate_window = Duration::from_secs(secs);
        }

        if let Some(secs) = parse(&lookup, "PB_CALL_TIMEOUT_SECS")? {
            config.client.default_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, "PB_STATS_INTERVAL_SECS")? {
            config.stats_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, "PB_CALL_INTERVAL_SECS")? {
            config.call_interval = Duration::from_secs(secs);
        }
        config.fuzzy_threshold = parse(&lookup, "PB_FUZZY_THRESHOLD")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.bus.validate().context("invalid bus configuration")?;
        self.dispatcher
            .validate()
            .context("invalid dispatcher configuration")?;
        self.client.validate().context("invalid client configuration")?;
        if self.stats_interval.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "stats_interval",
            })
            .context("invalid runtime configuration");
        }
        if self.call_interval.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "call_interval",
            })
            .context("invalid runtime configuration");
        }
        Ok(())
    }
}

fn parse<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidEnv { var, value: raw.clone() })
        .with_context(|| format!("failed to read {var}"))
}
