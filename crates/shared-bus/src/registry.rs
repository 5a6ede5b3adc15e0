//! # Bus Registry
//!
//! Hands out exactly one [`Bus`] per transport session. Building a second
//! bus over the same session would duplicate listeners and split the
//! outbound queue, so callers always go through [`BusRegistry::bus_for`].

use crate::bus::Bus;
use crate::config::BusConfig;
use crate::policy::{DeliveryPolicy, ManualDeliveryPolicy};
use crate::ports::transport::Transport;
use parking_lot::Mutex;
use shared_types::{ConfigError, SessionId, SystemTimeSource, TimeSource};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Explicit owner of the per-session bus instances.
pub struct BusRegistry {
    buses: Mutex<HashMap<SessionId, Bus>>,
    config: BusConfig,
    policy: Arc<dyn DeliveryPolicy>,
    time: Arc<dyn TimeSource>,
}

impl BusRegistry {
    /// Registry with the manual-delivery policy and the system clock.
    pub fn new(config: BusConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            buses: Mutex::new(HashMap::new()),
            config,
            policy: Arc::new(ManualDeliveryPolicy::default()),
            time: Arc::new(SystemTimeSource),
        })
    }

    pub fn with_policy(mut self, policy: Arc<dyn DeliveryPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = time;
        self
    }

    /// The bus for `transport`'s session, created on first use.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bus_for(&self, transport: Arc<dyn Transport>) -> Bus {
        let session = transport.session_id();
        let mut buses = self.buses.lock();
        if let Some(bus) = buses.get(&session) {
            debug!(session = %session, "Reusing cached bus");
            return bus.clone();
        }

        let bus = Bus::start(
            transport,
            self.config.clone(),
            Arc::clone(&self.policy),
            Arc::clone(&self.time),
        );
        buses.insert(session.clone(), bus.clone());
        info!(session = %session, "Bus registered");
        bus
    }

    pub fn get(&self, session: &SessionId) -> Option<Bus> {
        self.buses.lock().get(session).cloned()
    }

    /// Forget the session's bus and stop its worker.
    pub fn release(&self, session: &SessionId) -> bool {
        match self.buses.lock().remove(session) {
            Some(bus) => {
                bus.shutdown();
                info!(session = %session, "Bus released");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.buses.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buses.lock().is_empty()
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }
}
