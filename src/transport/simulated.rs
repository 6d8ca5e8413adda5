// src/transport/simulated.rs

//! An in-process stand-in for the peripheral, used by tests and `--simulate`.

use super::{ChannelId, NotificationHandler, Transport};
use crate::core::FurbyError;
use crate::core::protocol::{Frame, KEEP_ALIVE_ACK_PREFIX, KEEP_ALIVE_COMMAND};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_ADDRESS: &str = "00:00:5E:00:53:FB";

type SharedHandler = Arc<dyn Fn(Frame) + Send + Sync>;

#[derive(Default)]
struct SimState {
    connected: Option<String>,
    writes: Vec<(ChannelId, Frame)>,
    handlers: HashMap<ChannelId, SharedHandler>,
    ack_delay: Option<Duration>,
    write_delay: Option<Duration>,
}

/// A scriptable fake device. By default it acknowledges every keep-alive
/// immediately, before the write call returns.
pub struct SimulatedTransport {
    state: Mutex<SimState>,
    auto_ack: AtomicBool,
    fail_writes: AtomicBool,
    fail_connect: AtomicBool,
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            auto_ack: AtomicBool::new(true),
            fail_writes: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
        }
    }

    /// Whether keep-alives are acknowledged.
    pub fn set_auto_ack(&self, enabled: bool) {
        self.auto_ack.store(enabled, Ordering::SeqCst);
    }

    /// Delays acknowledgments instead of sending them inline.
    pub fn set_ack_delay(&self, delay: Option<Duration>) {
        self.state.lock().ack_delay = delay;
    }

    /// Makes every write take this long before it completes.
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        self.state.lock().write_delay = delay;
    }

    /// Makes every write fail as if the link had dropped.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Emits a notification to every subscriber. Returns false if nobody is subscribed.
    pub fn notify(&self, frame: impl Into<Frame>) -> bool {
        let frame = frame.into();
        let handlers: Vec<SharedHandler> = self.state.lock().handlers.values().cloned().collect();
        for handler in &handlers {
            handler(frame.clone());
        }
        !handlers.is_empty()
    }

    /// Every frame written so far, in order.
    pub fn writes(&self) -> Vec<Frame> {
        self.state
            .lock()
            .writes
            .iter()
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    pub fn keep_alive_count(&self) -> usize {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|(_, frame)| frame.as_ref() == KEEP_ALIVE_COMMAND)
            .count()
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected.is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().handlers.len()
    }

    fn acknowledge(&self) {
        let ack = Bytes::from(vec![KEEP_ALIVE_ACK_PREFIX[0], KEEP_ALIVE_COMMAND[1]]);
        let (delay, handlers) = {
            let state = self.state.lock();
            let handlers: Vec<SharedHandler> = state.handlers.values().cloned().collect();
            (state.ack_delay, handlers)
        };
        match delay {
            None => {
                for handler in &handlers {
                    handler(ack.clone());
                }
            }
            Some(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    for handler in &handlers {
                        handler(ack.clone());
                    }
                });
            }
        }
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn connect(
        &self,
        address: Option<&str>,
        _timeout: Duration,
    ) -> Result<String, FurbyError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(FurbyError::Transport("simulated device not found".into()));
        }
        let address = address.unwrap_or(DEFAULT_ADDRESS).to_string();
        self.state.lock().connected = Some(address.clone());
        info!("Simulated device connected @ {}", address);
        Ok(address)
    }

    async fn write(&self, channel: ChannelId, data: &[u8]) -> Result<(), FurbyError> {
        if self.state.lock().connected.is_none() {
            return Err(FurbyError::TransportWrite("not connected".into()));
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(FurbyError::TransportWrite("simulated link failure".into()));
        }
        let write_delay = self.state.lock().write_delay;
        if let Some(delay) = write_delay {
            tokio::time::sleep(delay).await;
        }
        self.state
            .lock()
            .writes
            .push((channel, Bytes::copy_from_slice(data)));
        debug!("Simulated device received {}", hex::encode(data));

        if data == KEEP_ALIVE_COMMAND && self.auto_ack.load(Ordering::SeqCst) {
            self.acknowledge();
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: ChannelId,
        handler: NotificationHandler,
    ) -> Result<(), FurbyError> {
        let mut state = self.state.lock();
        if state.connected.is_none() {
            return Err(FurbyError::Transport("cannot subscribe while disconnected".into()));
        }
        state.handlers.insert(channel, Arc::from(handler));
        Ok(())
    }

    async fn unsubscribe(&self, channel: ChannelId) -> Result<(), FurbyError> {
        self.state.lock().handlers.remove(&channel);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), FurbyError> {
        let mut state = self.state.lock();
        state.handlers.clear();
        state.connected = None;
        info!("Simulated device disconnected.");
        Ok(())
    }
}
