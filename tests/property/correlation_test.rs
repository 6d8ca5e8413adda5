// tests/property/correlation_test.rs

//! Property-based tests for correlation invariants
//! Tests that a frame completes at most one expectation, and always the oldest eligible one

use bytes::Bytes;
use furbyctl::core::correlation::CorrelationRegistry;
use furbyctl::core::keepalive::KeepAliveState;
use furbyctl::core::protocol::ResponseMatcher;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        max_shrink_iters: 500,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_frame_goes_to_oldest_matching_expectation(
        prefixes in prop::collection::vec(0u8..4, 1..=12),
        frame in prop::collection::vec(0u8..4, 1..=3)
    ) {
        let rt = paused_runtime();
        rt.block_on(async {
            let registry = Arc::new(CorrelationRegistry::new());
            let expectations: Vec<_> = prefixes
                .iter()
                .map(|p| registry.register(ResponseMatcher::prefix(vec![*p]), Duration::from_secs(1)))
                .collect();

            let winner = prefixes.iter().position(|p| *p == frame[0]);
            let consumed = registry.on_frame(Bytes::from(frame.clone()));

            assert_eq!(consumed, winner.is_some());
            assert_eq!(registry.len(), prefixes.len() - usize::from(consumed));

            for (index, expectation) in expectations.into_iter().enumerate() {
                let result = expectation.wait().await;
                if Some(index) == winner {
                    assert_eq!(result.unwrap(), Bytes::from(frame.clone()));
                } else {
                    assert!(result.is_err());
                }
            }
            assert!(registry.is_empty());
        });
    }

    #[test]
    fn test_each_frame_completes_at_most_one_expectation(
        count in 1usize..10,
        frames in 0usize..15
    ) {
        let rt = paused_runtime();
        rt.block_on(async {
            let registry = Arc::new(CorrelationRegistry::new());
            let _expectations: Vec<_> = (0..count)
                .map(|_| registry.register(ResponseMatcher::keep_alive_ack(), Duration::from_secs(1)))
                .collect();

            let consumed = (0..frames)
                .filter(|_| registry.on_frame(Bytes::from_static(&[0x22, 0x06])))
                .count();

            assert_eq!(consumed, frames.min(count));
            assert_eq!(registry.len(), count - consumed);
        });
    }

    #[test]
    fn test_idle_exactly_when_elapsed_exceeds_threshold(
        threshold_ms in 1u64..10_000,
        elapsed_ms in 0u64..20_000
    ) {
        let rt = paused_runtime();
        rt.block_on(async {
            let state = KeepAliveState::new();
            state.touch();
            tokio::time::advance(Duration::from_millis(elapsed_ms)).await;

            let now = tokio::time::Instant::now();
            assert_eq!(
                state.is_idle(now, Duration::from_millis(threshold_ms)),
                elapsed_ms > threshold_ms
            );
        });
    }
}
