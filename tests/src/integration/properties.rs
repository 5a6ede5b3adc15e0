//! # Load Properties
//!
//! Randomized offline bursts against a small queue: the queue never grows
//! past its capacity, and after reconnecting the newest messages arrive
//! exactly once, in send order.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use proptest::prelude::*;
    use serde_json::json;
    use shared_bus::BusConfig;
    use shared_types::ConnectionState;

    use crate::integration::harness::{drain, settle, Room};

    const CAPACITY: usize = 8;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_offline_burst_is_bounded_and_ordered(
            count in 1usize..40,
            topics in proptest::collection::vec(prop_oneof!["canvas", "chat"], 40),
        ) {
            let delivered = runtime().block_on(async {
                let config = BusConfig {
                    max_queue_size: CAPACITY,
                    ..BusConfig::default()
                };
                let room = Room::with_config(ConnectionState::Reconnecting, config);
                let mut canvas = room.agent_bus.subscribe_stream("canvas");
                let mut chat = room.agent_bus.subscribe_stream("chat");

                for (n, topic) in topics.iter().take(count).enumerate() {
                    room.user_bus.send_with_result(topic, json!({ "n": n })).await;
                    assert!(room.user_bus.queue_len() <= CAPACITY);
                }

                room.hub.set_connection_state(ConnectionState::Connected);
                room.user_bus.flush().await;
                settle().await;
                tokio::time::sleep(Duration::from_millis(20)).await;

                let per_topic: Vec<Vec<u64>> = [drain(&mut canvas), drain(&mut chat)]
                    .iter()
                    .map(|messages| {
                        messages
                            .iter()
                            .filter_map(|m| m.payload["n"].as_u64())
                            .collect()
                    })
                    .collect();
                for arrivals in &per_topic {
                    assert!(arrivals.windows(2).all(|w| w[0] < w[1]), "out of order: {arrivals:?}");
                }

                let mut numbers: Vec<u64> = per_topic.concat();
                let arrival_len = numbers.len();
                numbers.sort_unstable();
                numbers.dedup();
                assert_eq!(numbers.len(), arrival_len, "duplicate delivery");
                assert_eq!(room.user_bus.queue_len(), 0);
                numbers
            });

            let kept = count.min(CAPACITY);
            let expected: Vec<u64> = ((count - kept) as u64..count as u64).collect();
            prop_assert_eq!(delivered, expected);
        }
    }
}
