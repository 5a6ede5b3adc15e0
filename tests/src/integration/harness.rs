//! # Test Harness
//!
//! One loopback room with a user side and an agent side, each with its own
//! bus. The dispatcher always runs on the agent side.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use call_dispatcher::tools::register_builtins;
use call_dispatcher::{CallClient, CallDispatcher, ClientConfig, DispatcherConfig, ToolRegistry};
use serde_json::{json, Value};
use shared_bus::{
    Bus, BusConfig, BusMessage, BusRegistry, LoopbackHub, LoopbackTransport, MessageStream,
};
use shared_types::{
    ConnectionState, ManualTimeSource, PeerInfo, PeerRole, SessionId, TimeSource, Timestamp,
};

pub const WAIT: Duration = Duration::from_secs(3);

/// A two-sided loopback room.
pub struct Room {
    pub hub: Arc<LoopbackHub>,
    pub user: Arc<LoopbackTransport>,
    pub agent: Arc<LoopbackTransport>,
    pub user_bus: Bus,
    pub agent_bus: Bus,
    pub clock: ManualTimeSource,
    /// Executions of the `count` tool.
    pub executions: Arc<AtomicUsize>,
}

impl Room {
    pub fn new(state: ConnectionState) -> Self {
        Self::with_config(state, BusConfig::default())
    }

    pub fn with_config(state: ConnectionState, config: BusConfig) -> Self {
        let hub = LoopbackHub::with_limits(SessionId::new("integration"), state, 60_000);
        let user = hub.endpoint(PeerInfo::new("user-1"));
        let agent = hub.endpoint(PeerInfo::new("agent-1").with_role(PeerRole::agent()));
        let clock = ManualTimeSource::new(1_700_000_000_000);

        let user_bus = registry(&config, &clock).bus_for(user.clone());
        let agent_bus = registry(&config, &clock).bus_for(agent.clone());

        Self {
            hub,
            user,
            agent,
            user_bus,
            agent_bus,
            clock,
            executions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Started dispatcher on the agent bus, sharing the room clock.
    pub fn dispatcher(&self, config: DispatcherConfig) -> CallDispatcher {
        let dispatcher = CallDispatcher::with_time_source(
            self.agent_bus.clone(),
            Arc::new(self.tools()),
            config,
            Arc::new(self.clock.clone()),
        )
        .expect("valid dispatcher config");
        dispatcher.start();
        dispatcher
    }

    pub fn client(&self) -> CallClient {
        CallClient::new(
            self.user_bus.clone(),
            ClientConfig::default().with_origin("user-1"),
        )
        .expect("valid client config")
    }

    /// Built-ins plus `count`, which records each execution.
    pub fn tools(&self) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        register_builtins(&mut registry);
        let executions = Arc::clone(&self.executions);
        registry.register_fn("count", move |args| {
            let n = executions.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(json!({ "executions": n, "args": args })) }
        });
        registry
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    /// Current room clock reading.
    pub fn clock_now(&self) -> Timestamp {
        self.clock.now_ms()
    }
}

fn registry(config: &BusConfig, clock: &ManualTimeSource) -> BusRegistry {
    BusRegistry::new(config.clone())
        .expect("valid bus config")
        .with_time_source(Arc::new(clock.clone()))
}

/// Next message on `stream`, failing the test after [`WAIT`].
pub async fn next(stream: &mut MessageStream) -> BusMessage {
    tokio::time::timeout(WAIT, stream.recv())
        .await
        .expect("message within deadline")
        .expect("stream open")
}

/// Everything already buffered on `stream`.
pub fn drain(stream: &mut MessageStream) -> Vec<BusMessage> {
    std::iter::from_fn(|| stream.try_recv()).collect()
}

/// Let in-flight deliveries land.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

pub fn payloads(messages: &[BusMessage]) -> Vec<Value> {
    messages.iter().map(|m| m.payload.clone()).collect()
}
