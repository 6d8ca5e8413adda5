// src/transport/mod.rs

//! The seam between the command engine and the radio.
//!
//! A transport owns the link lifecycle and exposes a write channel plus a
//! notification subscription. Notifications are delivered to a handler from
//! whatever task the transport uses internally.

pub mod ble;
pub mod simulated;

pub use ble::BleTransport;
pub use simulated::SimulatedTransport;

use crate::core::FurbyError;
use crate::core::protocol::Frame;
use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

/// Identifies a characteristic on the peripheral.
pub type ChannelId = Uuid;

/// Invoked by the transport for every notification on a subscribed channel.
pub type NotificationHandler = Box<dyn Fn(Frame) + Send + Sync>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens the link. With no address the transport locates the device itself.
    /// Returns the address it connected to.
    async fn connect(&self, address: Option<&str>, timeout: Duration)
    -> Result<String, FurbyError>;

    /// Writes one frame to a characteristic.
    async fn write(&self, channel: ChannelId, data: &[u8]) -> Result<(), FurbyError>;

    async fn subscribe(
        &self,
        channel: ChannelId,
        handler: NotificationHandler,
    ) -> Result<(), FurbyError>;

    async fn unsubscribe(&self, channel: ChannelId) -> Result<(), FurbyError>;

    async fn disconnect(&self) -> Result<(), FurbyError>;
}
