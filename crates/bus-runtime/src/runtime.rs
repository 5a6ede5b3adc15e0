//! # Bus Runtime
//!
//! Wires one loopback room: a user bus issuing calls through a
//! [`CallClient`], an agent bus running the [`CallDispatcher`] with the
//! built-in tools, and a task mirroring stats into Prometheus gauges.
//!
//! ## Startup Sequence
//!
//! 1. Build the loopback pair and one bus per side
//! 2. Register tools and create the dispatcher (agent side)
//! 3. Create the call client (user side)
//! 4. Start the dispatcher and the stats task
//! 5. Issue demo calls until shutdown

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use bus_telemetry::{
    forget_session, metric_inc, mirror_stats, time_histogram, BUS_SESSIONS, BUS_STATS, CALLS,
    CALL_ROUND_TRIP, CLIENT_STATS, DISPATCHER_STATS,
};
use call_dispatcher::{tools::register_builtins, CallClient, CallDispatcher, CallFailure, ToolRegistry};
use shared_bus::{Bus, BusRegistry, LoopbackHub, LoopbackTransport};
use shared_types::{PeerInfo, PeerRole, SessionId};

use crate::config::RuntimeConfig;

/// Handles to every live piece of the runtime. Cheap to clone.
#[derive(Clone)]
struct Handles {
    user_bus: Bus,
    agent_bus: Bus,
    dispatcher: CallDispatcher,
    client: CallClient,
    user_label: String,
    agent_label: String,
}

impl Handles {
    /// Copy current stats into the gauges.
    fn mirror(&self) {
        let results = [
            mirror_stats(&BUS_STATS, &self.user_label, &self.user_bus.stats()),
            mirror_stats(&BUS_STATS, &self.agent_label, &self.agent_bus.stats()),
            mirror_stats(&DISPATCHER_STATS, &self.agent_label, &self.dispatcher.stats()),
            mirror_stats(&CLIENT_STATS, &self.user_label, &self.client.stats()),
        ];
        for result in results {
            if let Err(e) = result {
                warn!(error = %e, "Failed to mirror stats");
            }
        }
    }
}

/// The demo runtime.
pub struct BusRuntime {
    config: RuntimeConfig,
    hub: Arc<LoopbackHub>,
    user_transport: Arc<LoopbackTransport>,
    user_registry: BusRegistry,
    agent_registry: BusRegistry,
    handles: Handles,
    /// Shutdown signal sender.
    shutdown_tx: watch::Sender<bool>,
    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,
}

impl BusRuntime {
    /// Build the room, buses, dispatcher and client.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        info!(session = %config.session, "Creating bus runtime");

        let session = SessionId::new(config.session.clone());
        let (hub, user_transport, agent_transport) = LoopbackHub::pair(
            session,
            PeerInfo::new(config.user_identity.clone()),
            PeerInfo::new(config.agent_identity.clone()).with_role(PeerRole::agent()),
        );

        let user_registry =
            BusRegistry::new(config.bus.clone()).context("failed to create user bus registry")?;
        let agent_registry =
            BusRegistry::new(config.bus.clone()).context("failed to create agent bus registry")?;
        let user_bus = user_registry.bus_for(user_transport.clone());
        let agent_bus = agent_registry.bus_for(agent_transport);

        let mut registry = ToolRegistry::new();
        if let Some(threshold) = config.fuzzy_threshold {
            registry = registry.with_fuzzy_threshold(threshold);
        }
        register_builtins(&mut registry);
        info!(tools = ?registry.names(), "Tools registered");

        let dispatcher = CallDispatcher::new(
            agent_bus.clone(),
            Arc::new(registry),
            config.dispatcher.clone(),
        )
        .context("failed to create call dispatcher")?;

        let client = CallClient::new(user_bus.clone(), config.client.clone())
            .context("failed to create call client")?;

        let handles = Handles {
            user_label: format!("{}/{}", config.session, config.user_identity),
            agent_label: format!("{}/{}", config.session, config.agent_identity),
            user_bus,
            agent_bus,
            dispatcher,
            client,
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            hub,
            user_transport,
            user_registry,
            agent_registry,
            handles,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Start the dispatcher and the stats task.
    pub fn start(&self) {
        info!("===========================================");
        info!("  Presence Bus Runtime v{}", env!("CARGO_PKG_VERSION"));
        info!("===========================================");

        self.handles.dispatcher.start();
        BUS_SESSIONS.set(2);

        let handles = self.handles.clone();
        let interval = self.config.stats_interval;
        let mut shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => handles.mirror(),
                    _ = shutdown.changed() => {
                        debug!("Stats task stopping");
                        break;
                    }
                }
            }
        });

        info!(
            session = %self.config.session,
            user = %self.config.user_identity,
            agent = %self.config.agent_identity,
            "Runtime started"
        );
    }

    /// Issue demo calls every `call_interval` until shutdown.
    pub fn spawn_demo(&self) {
        let handles = self.handles.clone();
        let interval = self.config.call_interval;
        let mut shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move {
            let mut round = 0u64;
            loop {
                round += 1;
                tokio::select! {
                    _ = demo_round(&handles.client, round) => {}
                    _ = shutdown.changed() => break,
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.changed() => break,
                }
            }
            debug!("Demo task stopping");
        });
    }

    /// Run one round of demo calls and return their outcomes.
    pub async fn run_demo_round(&self, round: u64) -> Vec<(String, Result<Value, CallFailure>)> {
        demo_round(&self.handles.client, round).await
    }

    /// Copy current stats into the metrics gauges now.
    pub fn mirror_stats(&self) {
        self.handles.mirror();
    }

    /// Shut the runtime down.
    ///
    /// ## Shutdown Sequence
    ///
    /// 1. Signal shutdown to the background tasks
    /// 2. Stop the dispatcher and the client
    /// 3. Mirror final stats, then release both buses
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown...");

        if let Err(e) = self.shutdown_tx.send(true) {
            error!("Failed to send shutdown signal: {}", e);
        }

        self.handles.dispatcher.shutdown();
        self.handles.client.shutdown();
        self.handles.mirror();

        let session = SessionId::new(self.config.session.clone());
        self.user_registry.release(&session);
        self.agent_registry.release(&session);
        self.hub.close();

        forget_session(&self.handles.user_label);
        forget_session(&self.handles.agent_label);
        BUS_SESSIONS.set(0);

        info!("Shutdown complete");
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn hub(&self) -> &Arc<LoopbackHub> {
        &self.hub
    }

    /// The calling side's transport, for simulating presence changes.
    pub fn user_transport(&self) -> &Arc<LoopbackTransport> {
        &self.user_transport
    }

    pub fn user_bus(&self) -> &Bus {
        &self.handles.user_bus
    }

    pub fn agent_bus(&self) -> &Bus {
        &self.handles.agent_bus
    }

    pub fn dispatcher(&self) -> &CallDispatcher {
        &self.handles.dispatcher
    }

    pub fn client(&self) -> &CallClient {
        &self.handles.client
    }
}

/// One call per built-in tool, one through an alias, one to a missing tool.
async fn demo_round(client: &CallClient, round: u64) -> Vec<(String, Result<Value, CallFailure>)> {
    let calls = [
        ("do_nothing", json!({ "round": round })),
        ("echo", json!({ "round": round, "text": "hello" })),
        ("noop", json!({ "round": round, "via": "alias" })),
        ("paint_canvas", json!({ "round": round })),
    ];

    let mut outcomes = Vec::with_capacity(calls.len());
    for (tool, args) in calls {
        let outcome = {
            let _timer = time_histogram!(CALL_ROUND_TRIP);
            client.call(tool, args).await
        };
        metric_inc!(CALLS, &[tool, outcome_label(&outcome)]);
        match &outcome {
            Ok(value) => info!(tool, round, result = %value, "Call succeeded"),
            Err(e) => warn!(tool, round, error = %e, "Call failed"),
        }
        outcomes.push((tool.to_string(), outcome));
    }
    outcomes
}

fn outcome_label(outcome: &Result<Value, CallFailure>) -> &'static str {
    match outcome {
        Ok(_) => "ok",
        Err(CallFailure::Remote(_)) => "remote_error",
        Err(CallFailure::Timeout) => "timeout",
        Err(CallFailure::Undeliverable(_)) => "undeliverable",
    }
}
