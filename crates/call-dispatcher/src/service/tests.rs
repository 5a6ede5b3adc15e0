//! # Dispatcher Tests
//!
//! A user bus and an agent bus share one loopback room. The dispatcher runs
//! on the agent side; requests, results and errors cross the bus.

use super::*;
use crate::client::{CallClient, CallFailure};
use crate::domain::ClientConfig;
use crate::ports::tool::ToolError;
use crate::tools::register_builtins;
use serde_json::json;
use shared_bus::{BusConfig, BusRegistry, LoopbackHub, MessageStream, SendReason};
use shared_types::{
    ManualTimeSource, PeerInfo, PeerRole, SessionId, TOOL_CALL_TOPIC, TOOL_ERROR_TOPIC,
    TOOL_RESULT_TOPIC,
};

const WAIT: Duration = Duration::from_secs(2);

struct Harness {
    hub: Arc<LoopbackHub>,
    user_bus: Bus,
    agent_bus: Bus,
    dispatcher: CallDispatcher,
    clock: ManualTimeSource,
    results: MessageStream,
    errors: MessageStream,
}

fn registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    register_builtins(&mut registry);
    registry.register_fn("fail", |_| async {
        Err(ToolError::Failed("boom".into()))
    });
    registry.register_fn("slow", |args| async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(args)
    });
    registry.register_fn("hang", |_| async {
        std::future::pending::<Result<Value, ToolError>>().await
    });
    registry
}

fn harness(config: DispatcherConfig) -> Harness {
    let hub = LoopbackHub::new(SessionId::new("room"));
    let user = hub.endpoint(PeerInfo::new("user-1"));
    let agent = hub.endpoint(PeerInfo::new("agent-1").with_role(PeerRole::agent()));
    let clock = ManualTimeSource::new(1_000_000);

    let user_bus = BusRegistry::new(BusConfig::default()).unwrap().bus_for(user);
    let agent_bus = BusRegistry::new(BusConfig::default()).unwrap().bus_for(agent);

    let dispatcher = CallDispatcher::with_time_source(
        agent_bus.clone(),
        Arc::new(registry()),
        config,
        Arc::new(clock.clone()),
    )
    .unwrap();
    dispatcher.start();

    let results = user_bus.subscribe_stream(TOOL_RESULT_TOPIC);
    let errors = user_bus.subscribe_stream(TOOL_ERROR_TOPIC);

    Harness {
        hub,
        user_bus,
        agent_bus,
        dispatcher,
        clock,
        results,
        errors,
    }
}

fn request(id: &str, name: &str, args: Value) -> CallRequest {
    CallRequest::with_id(CallId::new(id), name, args, "user-1", 1_000_000)
}

async fn next(stream: &mut MessageStream) -> BusMessage {
    tokio::time::timeout(WAIT, stream.recv())
        .await
        .expect("message within deadline")
        .expect("stream open")
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn test_request_over_bus_publishes_result() {
    let mut h = harness(DispatcherConfig::default());

    let outcome = h
        .user_bus
        .send_json(TOOL_CALL_TOPIC, &request("c-1", "do_nothing", json!({})))
        .await;
    assert!(outcome.is_sent());

    let result: CallResult = next(&mut h.results).await.decode().unwrap();
    assert_eq!(result.call_id, CallId::new("c-1"));
    assert_ne!(result.id, result.call_id);
    assert_eq!(result.result["status"], "SUCCESS");

    // Released as soon as the result went out.
    assert_eq!(h.dispatcher.pending_len(), 0);
    let stats = h.dispatcher.stats();
    assert_eq!(stats.received, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.released, 1);
    assert_eq!(stats.breaker_signatures, 1);
}

#[tokio::test]
async fn test_duplicate_id_is_dropped_silently() {
    let mut h = harness(DispatcherConfig::default());
    let call = request("c-1", "echo", json!({"n": 1}));

    assert_eq!(h.dispatcher.submit(call.clone()), Ok(()));
    assert_eq!(h.dispatcher.submit(call), Err(Rejection::DuplicateId));

    let result: CallResult = next(&mut h.results).await.decode().unwrap();
    assert_eq!(result.call_id, CallId::new("c-1"));
    settle().await;
    assert!(h.results.try_recv().is_none());
    assert!(h.errors.try_recv().is_none());
    assert_eq!(h.dispatcher.stats().rejected_duplicate_id, 1);
}

#[tokio::test]
async fn test_same_signature_in_flight_is_duplicate() {
    let mut h = harness(DispatcherConfig::default());

    assert_eq!(h.dispatcher.submit(request("c-1", "slow", json!({"n": 1}))), Ok(()));
    assert_eq!(
        h.dispatcher.submit(request("c-2", "Slow", json!({"n": 1}))),
        Err(Rejection::DuplicateSignature)
    );
    // Different arguments are a different call.
    assert_eq!(h.dispatcher.submit(request("c-3", "slow", json!({"n": 2}))), Ok(()));

    let mut answered = vec![
        next(&mut h.results).await.decode::<CallResult>().unwrap().call_id,
        next(&mut h.results).await.decode::<CallResult>().unwrap().call_id,
    ];
    answered.sort();
    assert_eq!(answered, vec![CallId::new("c-1"), CallId::new("c-3")]);
}

#[tokio::test]
async fn test_signature_outside_window_is_not_duplicate() {
    let config = DispatcherConfig {
        breaker_cooldown: Duration::ZERO,
        ..DispatcherConfig::default()
    };
    let h = harness(config);

    assert_eq!(h.dispatcher.submit(request("c-1", "slow", json!({}))), Ok(()));
    h.clock.advance(3_001);
    assert_eq!(h.dispatcher.submit(request("c-2", "slow", json!({}))), Ok(()));
}

#[tokio::test]
async fn test_completed_signature_cools_down() {
    let mut h = harness(DispatcherConfig::default());

    h.dispatcher.submit(request("c-1", "echo", json!({"n": 1}))).unwrap();
    next(&mut h.results).await;

    h.clock.advance(5_000);
    assert_eq!(
        h.dispatcher.submit(request("c-2", "echo", json!({"n": 1}))),
        Err(Rejection::CoolingDown)
    );

    h.clock.advance(30_000);
    assert_eq!(h.dispatcher.submit(request("c-3", "echo", json!({"n": 1}))), Ok(()));
    let result: CallResult = next(&mut h.results).await.decode().unwrap();
    assert_eq!(result.call_id, CallId::new("c-3"));

    let breaker = h.dispatcher.breaker_stats();
    assert_eq!(breaker.total_rejected, 1);
    assert_eq!(breaker.total_recorded, 2);
}

#[tokio::test]
async fn test_disabled_breaker_keeps_completed_records() {
    let config = DispatcherConfig {
        breaker_cooldown: Duration::ZERO,
        ..DispatcherConfig::default()
    };
    let mut h = harness(config);

    h.dispatcher.submit(request("c-1", "echo", json!({}))).unwrap();
    next(&mut h.results).await;

    assert_eq!(h.dispatcher.status(&CallId::new("c-1")), Some(CallStatus::Completed));
    h.clock.advance(10_000);
    assert_eq!(h.dispatcher.submit(request("c-2", "echo", json!({}))), Ok(()));
}

#[tokio::test]
async fn test_unknown_tool_publishes_error() {
    let mut h = harness(DispatcherConfig::default());

    h.dispatcher.submit(request("c-1", "paint", json!({}))).unwrap();

    let error: CallError = next(&mut h.errors).await.decode().unwrap();
    assert_eq!(error.call_id, CallId::new("c-1"));
    assert_eq!(error.error, "Tool not found: paint");
    assert_eq!(h.dispatcher.status(&CallId::new("c-1")), Some(CallStatus::Error));
    assert_eq!(h.dispatcher.stats().errored, 1);
}

#[tokio::test]
async fn test_handler_failure_publishes_error_and_skips_breaker() {
    let mut h = harness(DispatcherConfig::default());

    h.dispatcher.submit(request("c-1", "fail", json!({}))).unwrap();

    let error: CallError = next(&mut h.errors).await.decode().unwrap();
    assert_eq!(error.error, "Tool execution failed: boom");
    assert_eq!(h.dispatcher.status(&CallId::new("c-1")), Some(CallStatus::Failed));
    assert_eq!(h.dispatcher.breaker_stats().open_signatures, 0);

    // Failed calls are not held by the breaker.
    assert_eq!(h.dispatcher.submit(request("c-2", "fail", json!({}))), Ok(()));
}

#[tokio::test]
async fn test_invalid_request_with_id_gets_error() {
    let mut h = harness(DispatcherConfig::default());

    h.user_bus
        .send_with_result(TOOL_CALL_TOPIC, json!({"id": "bad-1", "payload": "nope"}))
        .await;
    let error: CallError = next(&mut h.errors).await.decode().unwrap();
    assert_eq!(error.call_id, CallId::new("bad-1"));
    assert!(error.error.starts_with("Invalid call request"));

    h.user_bus
        .send_with_result(TOOL_CALL_TOPIC, json!({"payload": "nope"}))
        .await;
    settle().await;
    assert!(h.errors.try_recv().is_none());
    assert_eq!(h.dispatcher.stats().invalid, 2);
    assert_eq!(h.dispatcher.pending_len(), 0);
}

#[tokio::test]
async fn test_empty_name_is_invalid() {
    let mut h = harness(DispatcherConfig::default());

    assert_eq!(h.dispatcher.submit(request("c-1", "  ", json!({}))), Ok(()));
    let error: CallError = next(&mut h.errors).await.decode().unwrap();
    assert_eq!(error.call_id, CallId::new("c-1"));
    assert_eq!(h.dispatcher.pending_len(), 0);
}

#[tokio::test]
async fn test_sweep_evicts_records_past_max_age() {
    let config = DispatcherConfig {
        release_on_completion: false,
        ..DispatcherConfig::default()
    };
    let mut h = harness(config);

    h.dispatcher.submit(request("c-1", "echo", json!({}))).unwrap();
    h.dispatcher.submit(request("c-2", "paint", json!({}))).unwrap();
    next(&mut h.results).await;
    next(&mut h.errors).await;
    assert_eq!(h.dispatcher.pending_len(), 2);

    h.clock.advance(29_000);
    assert_eq!(h.dispatcher.sweep(), 0);

    h.clock.advance(2_000);
    assert_eq!(h.dispatcher.sweep(), 2);
    assert_eq!(h.dispatcher.pending_len(), 0);
    assert_eq!(h.dispatcher.stats().swept, 2);
    // Elapsed breaker entries go with them.
    assert_eq!(h.dispatcher.breaker_stats().open_signatures, 0);
}

#[tokio::test]
async fn test_sweep_evicts_handler_that_never_finishes() {
    let h = harness(DispatcherConfig::default());

    h.dispatcher.submit(request("c-1", "hang", json!({"x": 1}))).unwrap();
    settle().await;
    let stuck = h.dispatcher.pending_call(&CallId::new("c-1")).unwrap();
    assert_eq!(stuck.status, CallStatus::Executing);

    // Still in flight: the same signature is a duplicate.
    assert_eq!(
        h.dispatcher.submit(request("c-2", "hang", json!({"x": 1}))),
        Err(Rejection::DuplicateSignature)
    );

    h.clock.advance(31_000);
    assert_eq!(h.dispatcher.sweep(), 1);
    assert!(h.dispatcher.pending_call(&CallId::new("c-1")).is_none());

    assert_eq!(h.dispatcher.submit(request("c-3", "hang", json!({"x": 1}))), Ok(()));
    assert_eq!(h.dispatcher.pending_len(), 1);
}

#[tokio::test]
async fn test_alias_shares_signature_with_target() {
    let mut h = harness(DispatcherConfig::default());

    h.dispatcher.submit(request("c-1", "do_nothing", json!({}))).unwrap();
    next(&mut h.results).await;

    assert_eq!(
        h.dispatcher.submit(request("c-2", "noop", json!({}))),
        Err(Rejection::CoolingDown)
    );
    assert_eq!(h.dispatcher.breaker_stats().open_signatures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_task_runs_on_interval() {
    let config = DispatcherConfig {
        sweep_interval: Duration::from_secs(1),
        ..DispatcherConfig::default()
    };
    let mut h = harness(config);

    h.dispatcher.submit(request("c-1", "paint", json!({}))).unwrap();
    next(&mut h.errors).await;
    assert_eq!(h.dispatcher.pending_len(), 1);

    h.clock.advance(31_000);
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(h.dispatcher.pending_len(), 0);
}

#[tokio::test]
async fn test_shutdown_stops_listening() {
    let mut h = harness(DispatcherConfig::default());
    h.dispatcher.shutdown();
    assert_eq!(h.agent_bus.subscriber_count(TOOL_CALL_TOPIC), 0);

    h.user_bus
        .send_json(TOOL_CALL_TOPIC, &request("c-1", "echo", json!({})))
        .await;
    settle().await;
    assert!(h.results.try_recv().is_none());

    // Restartable.
    h.dispatcher.start();
    h.user_bus
        .send_json(TOOL_CALL_TOPIC, &request("c-2", "echo", json!({})))
        .await;
    let result: CallResult = next(&mut h.results).await.decode().unwrap();
    assert_eq!(result.call_id, CallId::new("c-2"));
}

#[tokio::test]
async fn test_client_round_trip() {
    let h = harness(DispatcherConfig::default());
    let client = CallClient::new(h.user_bus.clone(), ClientConfig::default().with_origin("user-1"))
        .unwrap();

    let value = client.call("echo", json!({"text": "hi"})).await;
    assert_eq!(value, Ok(json!({"text": "hi"})));

    let missing = client.call("paint", json!({})).await;
    assert_eq!(missing, Err(CallFailure::Remote("Tool not found: paint".into())));

    let stats = client.stats();
    assert_eq!(stats.issued, 2);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.pending, 0);
}

#[tokio::test(start_paused = true)]
async fn test_client_duplicate_call_times_out() {
    let h = harness(DispatcherConfig::default());
    let client = CallClient::new(h.user_bus.clone(), ClientConfig::default()).unwrap();

    let timeout = Duration::from_secs(1);
    let (first, second) = tokio::join!(
        client.call_with_timeout("slow", json!({"n": 1}), timeout),
        client.call_with_timeout("slow", json!({"n": 1}), timeout),
    );

    let mut outcomes = vec![first, second];
    outcomes.sort_by_key(|o| o.is_err());
    assert_eq!(outcomes[0], Ok(json!({"n": 1})));
    assert_eq!(outcomes[1], Err(CallFailure::Timeout));
    assert_eq!(client.stats().timed_out, 1);
    assert_eq!(h.dispatcher.stats().rejected_duplicate_signature, 1);
}

#[tokio::test]
async fn test_client_undeliverable_without_session() {
    let h = harness(DispatcherConfig::default());
    let client = CallClient::new(h.user_bus.clone(), ClientConfig::default()).unwrap();
    h.hub.close();

    let outcome = client.call("echo", json!({})).await;
    assert_eq!(
        outcome,
        Err(CallFailure::Undeliverable(SendReason::TransportUnavailable))
    );
    assert_eq!(client.pending_len(), 0);
}

#[tokio::test]
async fn test_client_ignores_unknown_call_ids() {
    let h = harness(DispatcherConfig::default());
    let client = CallClient::new(h.user_bus.clone(), ClientConfig::default()).unwrap();

    let stray = CallResult {
        id: CallId::generate(),
        call_id: CallId::new("someone-else"),
        result: json!(null),
        timestamp: 0,
        execution_time_ms: 0,
    };
    h.agent_bus.send_json(TOOL_RESULT_TOPIC, &stray).await;
    settle().await;

    assert_eq!(client.stats().unmatched, 1);
    assert_eq!(client.stats().completed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_client_sweep_expires_abandoned_calls() {
    let h = harness(DispatcherConfig::default());
    h.dispatcher.shutdown();
    let config = ClientConfig {
        sweep_interval: Duration::from_millis(100),
        ..ClientConfig::default()
    };
    let client = CallClient::new(h.user_bus.clone(), config).unwrap();

    // Nobody answers.
    let outcome = client
        .call_with_timeout("echo", json!({}), Duration::from_millis(250))
        .await;
    assert_eq!(outcome, Err(CallFailure::Timeout));
    assert_eq!(client.pending_len(), 0);
    assert_eq!(client.stats().timed_out, 1);
}
