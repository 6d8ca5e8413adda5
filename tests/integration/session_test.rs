// tests/integration/session_test.rs

//! Integration tests for the connection session lifecycle
//! Tests: start/stop ordering, failure rollback, command validation

use super::test_helpers::TestContext;
use bytes::Bytes;
use furbyctl::FurbyError;
use furbyctl::SessionState;
use furbyctl::core::protocol::{KEEP_ALIVE_COMMAND, NamedCommand, ResponseMatcher};
use furbyctl::core::tasks::keepalive::KeepAliveEvent;
use std::time::Duration;
use tokio::time::sleep;

// ===== Lifecycle =====

#[tokio::test]
async fn test_start_connects_and_subscribes() {
    let ctx = TestContext::new();
    assert_eq!(ctx.session.state(), SessionState::Disconnected);

    let address = ctx.session.start().await.unwrap();

    assert_eq!(ctx.session.state(), SessionState::Connected);
    assert_eq!(ctx.session.address(), Some(address));
    assert!(ctx.transport.is_connected());
    assert_eq!(ctx.transport.subscriber_count(), 1);
}

#[tokio::test]
async fn test_start_uses_configured_address() {
    let mut config = super::test_helpers::test_config(false);
    config.device.address = Some("AA:BB:CC:DD:EE:FF".to_string());
    let ctx = TestContext::with_config(config);

    let address = ctx.session.start().await.unwrap();
    assert_eq!(address, "AA:BB:CC:DD:EE:FF");
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let ctx = TestContext::connected().await;
    let err = ctx.session.start().await.unwrap_err();
    assert!(matches!(err, FurbyError::InvalidState(_)));
    assert_eq!(ctx.session.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_failed_start_returns_to_disconnected() {
    let ctx = TestContext::new();
    ctx.transport.set_fail_connect(true);

    let err = ctx.session.start().await.unwrap_err();
    assert!(matches!(err, FurbyError::Transport(_)));
    assert_eq!(ctx.session.state(), SessionState::Disconnected);
    assert_eq!(ctx.session.address(), None);

    // The session is reusable once the device is reachable.
    ctx.transport.set_fail_connect(false);
    ctx.session.start().await.unwrap();
    assert!(ctx.session.is_connected());
}

#[tokio::test]
async fn test_stop_releases_everything() {
    let ctx = TestContext::connected().await;
    ctx.session.stop().await.unwrap();

    assert_eq!(ctx.session.state(), SessionState::Disconnected);
    assert_eq!(ctx.session.address(), None);
    assert!(!ctx.transport.is_connected());
    assert_eq!(ctx.transport.subscriber_count(), 0);
    assert!(ctx.session.registry().is_empty());
}

#[tokio::test]
async fn test_stop_when_disconnected_is_rejected() {
    let ctx = TestContext::new();
    let err = ctx.session.stop().await.unwrap_err();
    assert!(matches!(err, FurbyError::InvalidState(_)));
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_pending_expectations() {
    let ctx = TestContext::connected().await;
    ctx.transport.set_auto_ack(false);

    let issuer = ctx.session.issuer().clone();
    let waiter = tokio::spawn(async move {
        issuer
            .send_command(
                &KEEP_ALIVE_COMMAND,
                Some(ResponseMatcher::keep_alive_ack()),
                Duration::from_secs(30),
            )
            .await
    });
    tokio::task::yield_now().await;
    assert_eq!(ctx.session.registry().len(), 1);

    ctx.session.stop().await.unwrap();
    assert_eq!(waiter.await.unwrap(), Err(FurbyError::Cancelled));
    assert!(ctx.session.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_waits_for_unacknowledged_keep_alive() {
    let ctx = TestContext::with_watchdog();
    ctx.transport.set_auto_ack(false);
    let mut events = ctx.session.subscribe_events();
    ctx.session.start().await.unwrap();

    // The first keep-alive is in flight and will never be acknowledged.
    sleep(Duration::from_millis(500)).await;
    assert_eq!(ctx.transport.keep_alive_count(), 1);
    assert_eq!(ctx.session.registry().len(), 1);

    ctx.session.stop().await.unwrap();

    assert_eq!(events.recv().await.unwrap(), KeepAliveEvent::NoResponse);
    assert_eq!(ctx.session.state(), SessionState::Disconnected);
    assert!(ctx.session.registry().is_empty());
    assert_eq!(ctx.transport.subscriber_count(), 0);

    // No task is left to write anything.
    sleep(Duration::from_secs(10)).await;
    assert_eq!(ctx.transport.keep_alive_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_lets_in_flight_keep_alive_be_acknowledged() {
    let ctx = TestContext::with_watchdog();
    ctx.transport.set_ack_delay(Some(Duration::from_secs(1)));
    let mut events = ctx.session.subscribe_events();
    ctx.session.start().await.unwrap();

    sleep(Duration::from_millis(200)).await;
    ctx.session.stop().await.unwrap();

    // Notifications stay attached until the watchdog is done.
    assert!(matches!(
        events.recv().await.unwrap(),
        KeepAliveEvent::Acknowledged(_)
    ));
    assert!(ctx.session.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_recovers_interrupted_stop() {
    let ctx = TestContext::with_watchdog();
    ctx.transport.set_auto_ack(false);
    ctx.session.start().await.unwrap();
    sleep(Duration::from_millis(100)).await;

    // `stop` is waiting on the unacknowledged keep-alive when it gets dropped.
    let interrupted = tokio::time::timeout(Duration::from_millis(500), ctx.session.stop()).await;
    assert!(interrupted.is_err());
    assert_eq!(ctx.session.state(), SessionState::Disconnecting);
    assert!(!ctx.session.is_connected());

    ctx.session.shutdown().await.unwrap();
    assert_eq!(ctx.session.state(), SessionState::Disconnected);
    assert!(!ctx.transport.is_connected());
    assert_eq!(ctx.transport.subscriber_count(), 0);
    assert!(ctx.session.registry().is_empty());

    // The session is usable again.
    ctx.session.start().await.unwrap();
    assert!(ctx.session.is_connected());
}

#[tokio::test]
async fn test_shutdown_covers_both_connected_and_idle_sessions() {
    let ctx = TestContext::new();
    ctx.session.shutdown().await.unwrap();
    assert!(!ctx.transport.is_connected());

    ctx.session.start().await.unwrap();
    ctx.session.shutdown().await.unwrap();
    assert_eq!(ctx.session.state(), SessionState::Disconnected);
    assert!(!ctx.transport.is_connected());
}

#[tokio::test]
async fn test_session_can_reconnect_after_stop() {
    let ctx = TestContext::connected().await;
    ctx.session.stop().await.unwrap();
    ctx.session.start().await.unwrap();

    ctx.session.send_named_command("toot").await.unwrap();
    assert_eq!(
        ctx.transport.writes(),
        vec![Bytes::from_static(&[0x13, 0x00, 0x07, 0x00, 0x01, 0x02])]
    );
}

// ===== Commands =====

#[tokio::test]
async fn test_named_commands_write_action_frames() {
    let ctx = TestContext::connected().await;

    let sent = ctx.session.send_named_command("FART").await.unwrap();
    assert_eq!(sent, NamedCommand::Fart);
    ctx.session.send_named_command("snore").await.unwrap();

    assert_eq!(
        ctx.transport.writes(),
        vec![
            Bytes::from_static(&[0x13, 0x00, 0x01, 0x02, 0x01, 0x04]),
            Bytes::from_static(&[0x13, 0x00, 0x4a, 0x00, 0x00, 0x01]),
        ]
    );
}

#[tokio::test]
async fn test_unknown_named_command_writes_nothing() {
    let ctx = TestContext::connected().await;
    let err = ctx.session.send_named_command("dance").await.unwrap_err();
    assert_eq!(err, FurbyError::UnknownCommand("dance".into()));
    assert!(ctx.transport.writes().is_empty());
}

#[tokio::test]
async fn test_custom_command_encodes_values() {
    let ctx = TestContext::connected().await;
    ctx.session.send_custom_command(1, 2, 3, 4).await.unwrap();
    assert_eq!(
        ctx.transport.writes(),
        vec![Bytes::from_static(&[0x13, 0x00, 0x01, 0x02, 0x03, 0x04])]
    );
}

#[tokio::test]
async fn test_custom_command_out_of_range_writes_nothing() {
    let ctx = TestContext::connected().await;

    for values in [[1, 2, 3, 256], [-1, 0, 0, 0], [0, 1000, 0, 0]] {
        let [w, x, y, z] = values;
        let err = ctx.session.send_custom_command(w, x, y, z).await.unwrap_err();
        assert!(matches!(err, FurbyError::InvalidArgument(_)));
    }
    assert!(ctx.transport.writes().is_empty());
}

#[tokio::test]
async fn test_commands_require_connection() {
    let ctx = TestContext::new();
    let err = ctx.session.send_named_command("fart").await.unwrap_err();
    assert!(matches!(err, FurbyError::InvalidState(_)));
    let err = ctx.session.send_custom_command(1, 2, 3, 4).await.unwrap_err();
    assert!(matches!(err, FurbyError::InvalidState(_)));
    assert!(ctx.transport.writes().is_empty());
}

#[tokio::test]
async fn test_write_failure_surfaces_to_caller() {
    let ctx = TestContext::connected().await;
    ctx.transport.set_fail_writes(true);

    let err = ctx.session.send_named_command("laugh").await.unwrap_err();
    assert!(matches!(err, FurbyError::TransportWrite(_)));
    assert!(ctx.session.registry().is_empty());
    // The session stays up; reconnection is the caller's decision.
    assert!(ctx.session.is_connected());
}
