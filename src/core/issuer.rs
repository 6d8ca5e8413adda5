// src/core/issuer.rs

//! Writes commands to the device and, when asked to, waits for the matching reply.

use crate::core::FurbyError;
use crate::core::correlation::CorrelationRegistry;
use crate::core::keepalive::KeepAliveState;
use crate::core::metrics;
use crate::core::protocol::{
    ACTION_HEADER, Frame, KEEP_ALIVE_COMMAND, ResponseMatcher, frame_hex,
};
use crate::transport::{ChannelId, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Issues commands on the write characteristic. Cheap to clone; every clone
/// shares the same registry and idle clock.
#[derive(Clone)]
pub struct CommandIssuer {
    transport: Arc<dyn Transport>,
    registry: Arc<CorrelationRegistry>,
    activity: Arc<KeepAliveState>,
    channel: ChannelId,
}

impl CommandIssuer {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<CorrelationRegistry>,
        activity: Arc<KeepAliveState>,
        channel: ChannelId,
    ) -> Self {
        Self {
            transport,
            registry,
            activity,
            channel,
        }
    }

    pub fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.registry
    }

    pub fn activity(&self) -> &Arc<KeepAliveState> {
        &self.activity
    }

    /// Writes `payload`. If `expect` is given, waits up to `timeout` for a frame it
    /// accepts and returns that frame; otherwise returns `None` right after the write.
    pub async fn send_command(
        &self,
        payload: &[u8],
        expect: Option<ResponseMatcher>,
        timeout: Duration,
    ) -> Result<Option<Frame>, FurbyError> {
        // Register before writing so a fast reply cannot slip past us. The
        // timeout only starts once the write has gone through.
        let expectation =
            expect.map(|matcher| self.registry.register_unarmed(matcher, timeout));
        let started = Instant::now();

        debug!("Writing {}", frame_hex(payload));
        if let Err(e) = self.transport.write(self.channel, payload).await {
            metrics::WRITE_FAILURES_TOTAL.inc();
            if let Some(expectation) = expectation {
                self.registry.cancel(expectation);
            }
            warn!("Write of {} failed: {}", frame_hex(payload), e);
            return Err(match e {
                FurbyError::TransportWrite(_) => e,
                other => FurbyError::TransportWrite(other.to_string()),
            });
        }

        self.activity.touch();
        metrics::COMMANDS_WRITTEN_TOTAL
            .with_label_values(&[command_kind(payload)])
            .inc();

        let Some(mut expectation) = expectation else {
            return Ok(None);
        };
        expectation.arm();

        let frame = expectation.wait().await?;
        metrics::RESPONSE_LATENCY_SECONDS.observe(started.elapsed().as_secs_f64());
        debug!("Received response {}", frame_hex(&frame));
        Ok(Some(frame))
    }
}

fn command_kind(payload: &[u8]) -> &'static str {
    if payload == KEEP_ALIVE_COMMAND {
        "keepalive"
    } else if payload.starts_with(&ACTION_HEADER) {
        "action"
    } else {
        "raw"
    }
}
