// src/core/tasks/dispatcher.rs

use crate::core::correlation::CorrelationRegistry;
use crate::core::metrics;
use crate::core::protocol::{Frame, frame_hex};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

/// The single consumer of inbound notifications. The transport's handler only
/// forwards frames into `rx`; all registry mutation on the inbound side happens
/// in this task.
pub struct FrameDispatcher {
    pub registry: Arc<CorrelationRegistry>,
    pub rx: mpsc::UnboundedReceiver<Frame>,
}

impl FrameDispatcher {
    pub fn new(registry: Arc<CorrelationRegistry>, rx: mpsc::UnboundedReceiver<Frame>) -> Self {
        Self { registry, rx }
    }

    /// Runs until shutdown is signalled or every sender is gone.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!("Frame dispatcher task started.");
        loop {
            tokio::select! {
                maybe_frame = self.rx.recv() => {
                    match maybe_frame {
                        Some(frame) => self.dispatch(frame),
                        None => {
                            debug!("Notification channel closed; frame dispatcher exiting.");
                            return;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Frame dispatcher shutting down.");
                    self.rx.close();
                    while let Some(frame) = self.rx.recv().await {
                        debug!("Draining frame {} on shutdown.", frame_hex(&frame));
                        self.dispatch(frame);
                    }
                    return;
                }
            }
        }
    }

    fn dispatch(&self, frame: Frame) {
        metrics::FRAMES_RECEIVED_TOTAL.inc();
        debug!("Notification {}", frame_hex(&frame));
        self.registry.on_frame(frame);
    }
}
