// src/core/tasks/keepalive.rs

use crate::config::KeepAliveConfig;
use crate::core::FurbyError;
use crate::core::issuer::CommandIssuer;
use crate::core::metrics;
use crate::core::protocol::{Frame, KEEP_ALIVE_COMMAND, ResponseMatcher, frame_hex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// The result of a single keep-alive attempt, published to session subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum KeepAliveEvent {
    /// The device acknowledged with this frame.
    Acknowledged(Frame),
    /// The keep-alive was written but nothing acknowledged it in time.
    NoResponse,
    /// The keep-alive could not be written.
    WriteFailed(String),
}

/// What the watchdog does on its next iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogStep {
    SendKeepAlive,
    Sleep(Duration),
}

/// A task that keeps the device attentive by writing a keep-alive whenever the
/// link has been idle for too long.
pub struct KeepAliveWatchdog {
    issuer: CommandIssuer,
    config: KeepAliveConfig,
    events: broadcast::Sender<KeepAliveEvent>,
}

impl KeepAliveWatchdog {
    pub fn new(
        issuer: CommandIssuer,
        config: KeepAliveConfig,
        events: broadcast::Sender<KeepAliveEvent>,
    ) -> Self {
        Self {
            issuer,
            config,
            events,
        }
    }

    /// Decides the next step from the shared idle clock.
    pub fn next_step(&self, now: Instant) -> WatchdogStep {
        if self
            .issuer
            .activity()
            .is_idle(now, self.config.idle_threshold)
        {
            WatchdogStep::SendKeepAlive
        } else {
            WatchdogStep::Sleep(self.config.idle_check_interval)
        }
    }

    /// Performs one keep-alive round-trip and reports the outcome.
    pub async fn send_keep_alive(&self) -> KeepAliveEvent {
        debug!("Sending keep-alive...");
        let result = self
            .issuer
            .send_command(
                &KEEP_ALIVE_COMMAND,
                Some(ResponseMatcher::keep_alive_ack()),
                self.config.response_timeout,
            )
            .await;

        let event = match result {
            Ok(Some(frame)) => {
                debug!("Keep-alive acknowledged with {}", frame_hex(&frame));
                KeepAliveEvent::Acknowledged(frame)
            }
            Ok(None) | Err(FurbyError::Timeout(_)) | Err(FurbyError::Cancelled) => {
                warn!("No keep-alive response!");
                KeepAliveEvent::NoResponse
            }
            Err(e) => {
                warn!("Keep-alive could not be sent: {}", e);
                KeepAliveEvent::WriteFailed(e.to_string())
            }
        };

        let label = match &event {
            KeepAliveEvent::Acknowledged(_) => "acknowledged",
            KeepAliveEvent::NoResponse => "no_response",
            KeepAliveEvent::WriteFailed(_) => "write_failed",
        };
        metrics::KEEPALIVES_TOTAL.with_label_values(&[label]).inc();
        // Nobody listening is fine.
        let _ = self.events.send(event.clone());
        event
    }

    /// Runs the watchdog loop until a shutdown signal is received. An attempt that
    /// is already in flight finishes (or times out) before the loop observes the signal.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "Keep-alive watchdog started. Idle threshold: {:?}, response timeout: {:?}.",
            self.config.idle_threshold, self.config.response_timeout
        );

        loop {
            let pause = match self.next_step(Instant::now()) {
                WatchdogStep::SendKeepAlive => {
                    self.send_keep_alive().await;
                    self.config.active_interval
                }
                WatchdogStep::Sleep(pause) => pause,
            };

            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("Keep-alive watchdog shutting down.");
                    return;
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}
