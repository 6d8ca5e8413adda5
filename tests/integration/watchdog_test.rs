// tests/integration/watchdog_test.rs

//! Integration tests for the keep-alive watchdog
//! Tests: idle threshold boundary, acknowledgment handling, scheduling inside a session

use super::test_helpers::{IssuerFixture, TestContext};
use furbyctl::config::KeepAliveConfig;
use furbyctl::core::tasks::keepalive::{KeepAliveEvent, KeepAliveWatchdog, WatchdogStep};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{Instant, advance, sleep};

fn watchdog(fx: &IssuerFixture) -> (KeepAliveWatchdog, broadcast::Receiver<KeepAliveEvent>) {
    let (events, rx) = broadcast::channel(8);
    let watchdog = KeepAliveWatchdog::new(fx.issuer.clone(), KeepAliveConfig::default(), events);
    (watchdog, rx)
}

// ===== Threshold =====

#[tokio::test(start_paused = true)]
async fn test_no_keep_alive_before_threshold() {
    let fx = IssuerFixture::new().await;
    let (watchdog, _rx) = watchdog(&fx);

    fx.activity.touch();
    advance(Duration::from_millis(2900)).await;

    assert_eq!(
        watchdog.next_step(Instant::now()),
        WatchdogStep::Sleep(Duration::from_millis(500))
    );
}

#[tokio::test(start_paused = true)]
async fn test_keep_alive_after_threshold_resets_clock() {
    let fx = IssuerFixture::new().await;
    let (watchdog, mut rx) = watchdog(&fx);

    fx.activity.touch();
    let touched_at = fx.activity.last_command_time().unwrap();
    advance(Duration::from_millis(3100)).await;
    assert_eq!(watchdog.next_step(Instant::now()), WatchdogStep::SendKeepAlive);

    let event = watchdog.send_keep_alive().await;
    assert!(matches!(event, KeepAliveEvent::Acknowledged(ref frame) if frame[0] == 0x22));
    assert_eq!(rx.recv().await.unwrap(), event);

    assert_eq!(fx.transport.keep_alive_count(), 1);
    let refreshed = fx.activity.last_command_time().unwrap();
    assert!(refreshed > touched_at);
    assert_eq!(watchdog.next_step(Instant::now()), WatchdogStep::Sleep(Duration::from_millis(500)));
}

#[tokio::test(start_paused = true)]
async fn test_exactly_at_threshold_is_not_idle() {
    let fx = IssuerFixture::new().await;
    let (watchdog, _rx) = watchdog(&fx);

    fx.activity.touch();
    advance(Duration::from_secs(3)).await;
    assert!(matches!(watchdog.next_step(Instant::now()), WatchdogStep::Sleep(_)));
}

#[tokio::test(start_paused = true)]
async fn test_fresh_connection_is_idle() {
    let fx = IssuerFixture::new().await;
    let (watchdog, _rx) = watchdog(&fx);
    assert_eq!(watchdog.next_step(Instant::now()), WatchdogStep::SendKeepAlive);
}

// ===== Failures =====

#[tokio::test(start_paused = true)]
async fn test_unacknowledged_keep_alive_reports_no_response() {
    let fx = IssuerFixture::new().await;
    fx.transport.set_auto_ack(false);
    let (watchdog, _rx) = watchdog(&fx);

    let started = Instant::now();
    assert_eq!(watchdog.send_keep_alive().await, KeepAliveEvent::NoResponse);
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(fx.registry.is_empty());
    // The write itself succeeded, so the link counts as active.
    assert!(fx.activity.last_command_time().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_failed_keep_alive_write_is_reported() {
    let fx = IssuerFixture::new().await;
    fx.transport.set_fail_writes(true);
    let (watchdog, _rx) = watchdog(&fx);

    let event = watchdog.send_keep_alive().await;
    assert!(matches!(event, KeepAliveEvent::WriteFailed(_)));
    assert!(fx.registry.is_empty());
}

// ===== Inside a session =====

#[tokio::test(start_paused = true)]
async fn test_watchdog_schedule_in_running_session() {
    let ctx = TestContext::with_watchdog();
    ctx.session.start().await.unwrap();

    // A fresh connection is idle, so the first keep-alive goes out right away.
    sleep(Duration::from_millis(100)).await;
    assert_eq!(ctx.transport.keep_alive_count(), 1);

    // Acknowledged at t=0; the next one is due once idle exceeds 3s.
    sleep(Duration::from_millis(3100)).await;
    assert_eq!(ctx.transport.keep_alive_count(), 1);
    sleep(Duration::from_millis(500)).await;
    assert_eq!(ctx.transport.keep_alive_count(), 2);

    ctx.session.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_user_commands_postpone_keep_alives() {
    let ctx = TestContext::with_watchdog();
    ctx.session.start().await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(ctx.transport.keep_alive_count(), 1);

    // t=2.2: a user command resets the idle clock.
    sleep(Duration::from_millis(2100)).await;
    ctx.session.send_named_command("laugh").await.unwrap();

    // Without the command the second keep-alive would have gone out at t=3.5.
    sleep(Duration::from_millis(2900)).await;
    assert_eq!(ctx.transport.keep_alive_count(), 1);
    sleep(Duration::from_millis(600)).await;
    assert_eq!(ctx.transport.keep_alive_count(), 2);

    ctx.session.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_missing_acknowledgments_keep_the_watchdog_running() {
    let ctx = TestContext::with_watchdog();
    ctx.transport.set_auto_ack(false);
    let mut events = ctx.session.subscribe_events();
    ctx.session.start().await.unwrap();

    assert_eq!(events.recv().await.unwrap(), KeepAliveEvent::NoResponse);
    assert!(ctx.session.is_connected());

    // Once acknowledgments resume, the watchdog reports them.
    ctx.transport.set_auto_ack(true);
    assert!(matches!(
        events.recv().await.unwrap(),
        KeepAliveEvent::Acknowledged(_)
    ));

    ctx.session.stop().await.unwrap();
}
