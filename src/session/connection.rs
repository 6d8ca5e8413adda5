// src/session/connection.rs

//! The composition root for a device connection.
//!
//! A session moves through `Disconnected -> Connecting -> Connected ->
//! Disconnecting -> Disconnected`. While connected it owns two background tasks:
//! the frame dispatcher, which feeds notifications into the correlation
//! registry, and the keep-alive watchdog. Shutdown is ordered so that the
//! watchdog's last attempt can still be acknowledged before notifications are
//! torn down.

use crate::config::{Config, DeviceConfig, KeepAliveConfig};
use crate::core::FurbyError;
use crate::core::correlation::CorrelationRegistry;
use crate::core::issuer::CommandIssuer;
use crate::core::keepalive::KeepAliveState;
use crate::core::metrics;
use crate::core::protocol::{ActionCommand, Frame, NamedCommand};
use crate::core::tasks::dispatcher::FrameDispatcher;
use crate::core::tasks::keepalive::{KeepAliveEvent, KeepAliveWatchdog};
use crate::transport::{NotificationHandler, Transport};
use parking_lot::Mutex;
use std::sync::Arc;
use strum_macros::Display;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// The lifecycle state of a `ConnectionSession`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Background tasks that exist only while connected.
struct SessionTasks {
    watchdog_shutdown: broadcast::Sender<()>,
    watchdog: Option<JoinHandle<()>>,
    dispatcher_shutdown: broadcast::Sender<()>,
    dispatcher: JoinHandle<()>,
}

pub struct ConnectionSession {
    device: DeviceConfig,
    keepalive: KeepAliveConfig,
    transport: Arc<dyn Transport>,
    registry: Arc<CorrelationRegistry>,
    issuer: CommandIssuer,
    state: Mutex<SessionState>,
    address: Mutex<Option<String>>,
    // Held across `start`/`stop` so lifecycle transitions never interleave.
    tasks: tokio::sync::Mutex<Option<SessionTasks>>,
    events: broadcast::Sender<KeepAliveEvent>,
}

impl ConnectionSession {
    pub fn new(config: &Config, transport: Arc<dyn Transport>) -> Self {
        let registry = Arc::new(CorrelationRegistry::new());
        let activity = Arc::new(KeepAliveState::new());
        let issuer = CommandIssuer::new(
            transport.clone(),
            registry.clone(),
            activity,
            config.device.tx_characteristic,
        );
        let (events, _) = broadcast::channel(16);

        Self {
            device: config.device.clone(),
            keepalive: config.keepalive.clone(),
            transport,
            registry,
            issuer,
            state: Mutex::new(SessionState::Disconnected),
            address: Mutex::new(None),
            tasks: tokio::sync::Mutex::new(None),
            events,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// The address of the connected device, if any.
    pub fn address(&self) -> Option<String> {
        self.address.lock().clone()
    }

    pub fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.registry
    }

    pub fn issuer(&self) -> &CommandIssuer {
        &self.issuer
    }

    /// Receives the outcome of every keep-alive attempt.
    pub fn subscribe_events(&self) -> broadcast::Receiver<KeepAliveEvent> {
        self.events.subscribe()
    }

    fn transition(&self, from: SessionState, to: SessionState) -> Result<(), FurbyError> {
        let mut state = self.state.lock();
        if *state != from {
            return Err(FurbyError::InvalidState(format!(
                "cannot move to {to} while {}",
                *state
            )));
        }
        *state = to;
        Ok(())
    }

    fn set_state(&self, to: SessionState) {
        *self.state.lock() = to;
    }

    /// Opens the transport, wires notifications into the registry, and starts the watchdog.
    pub async fn start(&self) -> Result<String, FurbyError> {
        let mut tasks = self.tasks.lock().await;
        self.transition(SessionState::Disconnected, SessionState::Connecting)?;

        let address = match self
            .transport
            .connect(self.device.address.as_deref(), self.device.connect_timeout)
            .await
        {
            Ok(address) => address,
            Err(e) => {
                error!("Failed to connect: {}", e);
                self.set_state(SessionState::Disconnected);
                return Err(e);
            }
        };

        let (frame_tx, frame_rx) = mpsc::unbounded_channel::<Frame>();
        let handler: NotificationHandler = Box::new(move |frame| {
            // The dispatcher is gone only during teardown; late frames are irrelevant then.
            let _ = frame_tx.send(frame);
        });
        if let Err(e) = self
            .transport
            .subscribe(self.device.rx_characteristic, handler)
            .await
        {
            error!("Failed to subscribe to notifications: {}", e);
            if let Err(e) = self.transport.disconnect().await {
                warn!("Disconnect after failed subscribe also failed: {}", e);
            }
            self.set_state(SessionState::Disconnected);
            return Err(e);
        }

        let (dispatcher_shutdown, dispatcher_shutdown_rx) = broadcast::channel(1);
        let dispatcher = FrameDispatcher::new(self.registry.clone(), frame_rx);
        let dispatcher = tokio::spawn(dispatcher.run(dispatcher_shutdown_rx));

        *self.address.lock() = Some(address.clone());
        self.set_state(SessionState::Connected);
        metrics::SESSION_CONNECTED.set(1.0);
        info!("Connected to Furby @ {}!", address);

        let (watchdog_shutdown, watchdog_shutdown_rx) = broadcast::channel(1);
        let watchdog = if self.keepalive.enabled {
            let watchdog = KeepAliveWatchdog::new(
                self.issuer.clone(),
                self.keepalive.clone(),
                self.events.clone(),
            );
            Some(tokio::spawn(watchdog.run(watchdog_shutdown_rx)))
        } else {
            info!("Keep-alive watchdog is disabled in the configuration.");
            None
        };

        *tasks = Some(SessionTasks {
            watchdog_shutdown,
            watchdog,
            dispatcher_shutdown,
            dispatcher,
        });
        Ok(address)
    }

    /// Stops the watchdog, detaches notifications, and closes the transport.
    /// When this returns, no background task is running and no expectation is pending.
    pub async fn stop(&self) -> Result<(), FurbyError> {
        let mut tasks = self.tasks.lock().await;
        self.transition(SessionState::Connected, SessionState::Disconnecting)?;
        self.teardown(tasks.take()).await
    }

    /// Closes the session from whatever state it is in. Unlike `stop`, this also
    /// recovers a session whose `start` or `stop` was cancelled part-way.
    pub async fn shutdown(&self) -> Result<(), FurbyError> {
        let mut tasks = self.tasks.lock().await;
        let state = self.state();
        if state == SessionState::Disconnected {
            return Ok(());
        }
        if state != SessionState::Connected {
            warn!("Forcing shutdown of a session left {}.", state);
        }
        self.set_state(SessionState::Disconnecting);
        self.teardown(tasks.take()).await
    }

    async fn teardown(&self, tasks: Option<SessionTasks>) -> Result<(), FurbyError> {
        if let Some(tasks) = tasks {
            // The watchdog finishes any in-flight attempt before it sees the signal.
            let _ = tasks.watchdog_shutdown.send(());
            if let Some(watchdog) = tasks.watchdog
                && let Err(e) = watchdog.await
            {
                error!("Keep-alive watchdog terminated abnormally: {e:?}");
            }

            if let Err(e) = self
                .transport
                .unsubscribe(self.device.rx_characteristic)
                .await
            {
                warn!("Failed to unsubscribe from notifications: {}", e);
            }

            let _ = tasks.dispatcher_shutdown.send(());
            if let Err(e) = tasks.dispatcher.await {
                error!("Frame dispatcher terminated abnormally: {e:?}");
            }
        }

        let leftovers = self.registry.cancel_all();
        if leftovers > 0 {
            warn!("Cancelled {} expectations left pending at shutdown.", leftovers);
        }

        let result = self.transport.disconnect().await;
        *self.address.lock() = None;
        self.set_state(SessionState::Disconnected);
        metrics::SESSION_CONNECTED.set(0.0);
        match &result {
            Ok(()) => info!("Disconnected from Furby."),
            Err(e) => warn!("Transport reported an error while disconnecting: {}", e),
        }
        result
    }

    fn ensure_connected(&self) -> Result<(), FurbyError> {
        let state = self.state();
        if state != SessionState::Connected {
            return Err(FurbyError::InvalidState(format!("not connected ({state})")));
        }
        Ok(())
    }

    /// Sends an already validated action. Fire-and-forget: the device does not
    /// acknowledge actions.
    pub async fn send_action(&self, action: ActionCommand) -> Result<(), FurbyError> {
        self.ensure_connected()?;
        info!("Sending action {}", action);
        self.issuer
            .send_command(&action.encode(), None, self.keepalive.response_timeout)
            .await?;
        Ok(())
    }

    /// Sends one of the built-in named actions.
    pub async fn send_named_command(&self, name: &str) -> Result<NamedCommand, FurbyError> {
        self.ensure_connected()?;
        let command = NamedCommand::lookup(name)?;
        self.send_action(command.action()).await?;
        Ok(command)
    }

    /// Sends `[0x13, 0x00, w, x, y, z]`. Values outside `0..=255` are rejected
    /// before anything is written.
    pub async fn send_custom_command(
        &self,
        w: i64,
        x: i64,
        y: i64,
        z: i64,
    ) -> Result<ActionCommand, FurbyError> {
        self.ensure_connected()?;
        let action = ActionCommand::from_values(&[w, x, y, z])?;
        self.send_action(action).await?;
        Ok(action)
    }
}
