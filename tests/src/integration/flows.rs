//! # Integration Flows
//!
//! End-to-end behavior across crates:
//!
//! 1. **Offline caller**: a call issued while reconnecting is delivered and
//!    executed exactly once after the channel comes back
//! 2. **Presence gating**: a manual message waits for the agent to join
//! 3. **Chunking**: calls with arguments larger than a frame round-trip whole
//! 4. **Dedup**: repeated calls execute once within the windows, again after
//! 5. **Bounded state**: the pending table stays bounded under load

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use call_dispatcher::{CallFailure, DispatcherConfig, Rejection};
    use serde_json::json;
    use shared_bus::{BusConfig, SendReason, SendStatus};
    use shared_types::{
        CallId, CallRequest, CallResult, ConnectionState, TOOL_CALL_TOPIC, TOOL_RESULT_TOPIC,
    };

    use crate::integration::harness::{drain, next, payloads, settle, Room};

    // =========================================================================
    // DELIVERY ACROSS CONNECTION CHANGES
    // =========================================================================

    #[tokio::test]
    async fn test_call_issued_offline_executes_once_after_reconnect() {
        let room = Room::new(ConnectionState::Reconnecting);
        let _dispatcher = room.dispatcher(DispatcherConfig::default());
        let client = room.client();

        let caller = client.clone();
        let call = tokio::spawn(async move { caller.call("count", json!({"x": 1})).await });
        settle().await;
        assert_eq!(room.user_bus.queue_len(), 1);
        assert_eq!(room.executions(), 0);

        room.hub.set_connection_state(ConnectionState::Connected);
        let result = call.await.unwrap().unwrap();
        assert_eq!(result["executions"], 1);

        settle().await;
        assert_eq!(room.executions(), 1);
        assert_eq!(room.user_bus.queue_len(), 0);
        assert_eq!(room.user_bus.stats().flushed, 1);
    }

    #[tokio::test]
    async fn test_queued_messages_flush_in_order() {
        let room = Room::new(ConnectionState::Disconnected);
        let mut stream = room.agent_bus.subscribe_stream("canvas");

        for n in 0..5 {
            let outcome = room
                .user_bus
                .send_with_result("canvas", json!({ "n": n }))
                .await;
            assert_eq!(outcome.status, SendStatus::Queued);
            assert_eq!(outcome.reason, Some(SendReason::NotConnected));
        }

        room.hub.set_connection_state(ConnectionState::Connected);
        let mut received = Vec::new();
        for _ in 0..5 {
            received.push(next(&mut stream).await);
        }
        assert_eq!(
            payloads(&received),
            (0..5).map(|n| json!({ "n": n })).collect::<Vec<_>>()
        );

        settle().await;
        assert!(drain(&mut stream).is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_is_retried_transparently() {
        let room = Room::new(ConnectionState::Connected);
        let _dispatcher = room.dispatcher(DispatcherConfig::default());
        let client = room.client();

        room.user.fail_next_publishes(1);
        let value = client.call("echo", json!({"text": "again"})).await;
        assert_eq!(value, Ok(json!({"text": "again"})));
        assert_eq!(room.user_bus.stats().flushed, 1);
    }

    // =========================================================================
    // PRESENCE GATING
    // =========================================================================

    #[tokio::test]
    async fn test_manual_message_waits_for_agent() {
        let room = Room::new(ConnectionState::Connected);
        room.agent.set_present(false);
        let mut stream = room.agent_bus.subscribe_stream("canvas");

        let outcome = room
            .user_bus
            .send_with_result("canvas", json!({"manual": true, "shape": "circle"}))
            .await;
        assert_eq!(outcome.reason, Some(SendReason::PeerNotPresent));

        room.agent.set_present(true);
        let message = next(&mut stream).await;
        assert_eq!(message.payload["shape"], "circle");
        assert_eq!(message.sender.as_deref(), Some("user-1"));
        assert_eq!(room.user_bus.queue_len(), 0);
    }

    // =========================================================================
    // CHUNKING
    // =========================================================================

    #[tokio::test]
    async fn test_large_call_round_trips_in_chunks() {
        let config = BusConfig {
            max_payload_size: Some(2_000),
            ..BusConfig::default()
        };
        let room = Room::with_config(ConnectionState::Connected, config);
        let _dispatcher = room.dispatcher(DispatcherConfig::default());
        let client = room.client();

        let blob = "abc".repeat(10_000);
        let value = client.call("echo", json!({ "blob": blob })).await.unwrap();
        assert_eq!(value["blob"].as_str().map(str::len), Some(30_000));

        assert!(room.user_bus.stats().chunks_published > 1);
        assert!(room.agent_bus.stats().chunks_published > 1);
        assert_eq!(room.agent_bus.pending_chunk_groups(), 0);
        assert_eq!(room.user_bus.pending_chunk_groups(), 0);
    }

    // =========================================================================
    // DEDUP AND COOLDOWN
    // =========================================================================

    #[tokio::test]
    async fn test_same_call_twice_within_a_second_executes_once() {
        let room = Room::new(ConnectionState::Connected);
        let _dispatcher = room.dispatcher(DispatcherConfig::default());
        let mut results = room.user_bus.subscribe_stream(TOOL_RESULT_TOPIC);

        let now = room.clock_now();
        let a = CallRequest::with_id(CallId::new("a"), "count", json!({"x": 1}), "user-1", now);
        room.user_bus.send_json(TOOL_CALL_TOPIC, &a).await;
        room.clock.advance(500);
        let b = CallRequest::with_id(CallId::new("b"), "count", json!({"x": 1}), "user-1", now + 500);
        room.user_bus.send_json(TOOL_CALL_TOPIC, &b).await;

        let result: CallResult = next(&mut results).await.decode().unwrap();
        assert_eq!(result.call_id, CallId::new("a"));
        settle().await;
        assert!(drain(&mut results).is_empty());
        assert_eq!(room.executions(), 1);
    }

    #[tokio::test]
    async fn test_cooldown_then_reacceptance() {
        let room = Room::new(ConnectionState::Connected);
        let dispatcher = room.dispatcher(DispatcherConfig::default());
        let client = room.client();

        client.call("count", json!({"x": 1})).await.unwrap();

        room.clock.advance(10_000);
        let now = room.clock_now();
        let replay = CallRequest::with_id(CallId::new("replay"), "count", json!({"x": 1}), "", now);
        assert_eq!(dispatcher.submit(replay), Err(Rejection::CoolingDown));

        room.clock.advance(30_000);
        let value = client.call("count", json!({"x": 1})).await.unwrap();
        assert_eq!(value["executions"], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_caller_times_out() {
        let room = Room::new(ConnectionState::Connected);
        let _dispatcher = room.dispatcher(DispatcherConfig::default());
        let client = room.client();

        client.call("count", json!({"x": 1})).await.unwrap();
        let replay = client
            .call_with_timeout("count", json!({"x": 1}), Duration::from_secs(2))
            .await;
        assert_eq!(replay, Err(CallFailure::Timeout));
    }

    #[tokio::test]
    async fn test_unknown_tool_reaches_caller_as_remote_error() {
        let room = Room::new(ConnectionState::Connected);
        let _dispatcher = room.dispatcher(DispatcherConfig::default());
        let client = room.client();

        let outcome = client.call("launch_rockets", json!({})).await;
        assert_eq!(
            outcome,
            Err(CallFailure::Remote("Tool not found: launch_rockets".into()))
        );
    }

    // =========================================================================
    // BOUNDED STATE
    // =========================================================================

    #[tokio::test]
    async fn test_pending_table_stays_bounded_under_load() {
        let room = Room::new(ConnectionState::Connected);
        let config = DispatcherConfig {
            release_on_completion: false,
            max_pending_calls: 50,
            ..DispatcherConfig::default()
        };
        let dispatcher = room.dispatcher(config);
        let now = room.clock_now();

        for i in 0..200 {
            let request = CallRequest::with_id(
                CallId::new(format!("load-{i}")),
                "echo",
                json!({ "i": i }),
                "user-1",
                now,
            );
            assert_eq!(dispatcher.submit(request), Ok(()));
            assert!(dispatcher.pending_len() <= 50);
        }

        settle().await;
        room.clock.advance(31_000);
        dispatcher.sweep();
        assert_eq!(dispatcher.pending_len(), 0);
    }
}

