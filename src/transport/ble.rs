// src/transport/ble.rs

//! A `Transport` backed by the host Bluetooth adapter through `btleplug`.

use super::{ChannelId, NotificationHandler, Transport};
use crate::config::DeviceConfig;
use crate::core::FurbyError;
use async_trait::async_trait;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::StreamExt;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A peripheral seen during a scan.
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    pub name: String,
    pub address: String,
}

struct BleLink {
    peripheral: Peripheral,
    characteristics: BTreeSet<Characteristic>,
    forwarders: HashMap<ChannelId, JoinHandle<()>>,
}

impl BleLink {
    fn characteristic(&self, channel: ChannelId) -> Result<Characteristic, FurbyError> {
        self.characteristics
            .iter()
            .find(|c| c.uuid == channel)
            .cloned()
            .ok_or_else(|| FurbyError::Transport(format!("Characteristic {channel} not found")))
    }
}

pub struct BleTransport {
    name_filter: String,
    scan_timeout: Duration,
    link: Mutex<Option<BleLink>>,
}

impl BleTransport {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            name_filter: config.name_filter.clone(),
            scan_timeout: config.scan_timeout,
            link: Mutex::new(None),
        }
    }

    async fn adapter() -> Result<Adapter, FurbyError> {
        let manager = Manager::new().await?;
        manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| FurbyError::Transport("No Bluetooth adapter found".into()))
    }

    /// Scans for `scan_timeout` and returns every peripheral whose advertised
    /// name contains the configured filter.
    pub async fn discover(&self) -> Result<Vec<DiscoveredDevice>, FurbyError> {
        let adapter = Self::adapter().await?;
        let found = self.scan(&adapter).await?;
        Ok(found
            .into_iter()
            .map(|(device, _)| device)
            .collect())
    }

    async fn scan(
        &self,
        adapter: &Adapter,
    ) -> Result<Vec<(DiscoveredDevice, Peripheral)>, FurbyError> {
        info!("Scanning for BLE devices for {:?}...", self.scan_timeout);
        adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(self.scan_timeout).await;
        if let Err(e) = adapter.stop_scan().await {
            debug!("stop_scan failed: {}", e);
        }

        let mut found = Vec::new();
        for peripheral in adapter.peripherals().await? {
            let Ok(Some(props)) = peripheral.properties().await else {
                continue;
            };
            if let Some(name) = props.local_name
                && name.contains(&self.name_filter)
            {
                let address = peripheral_address(&peripheral);
                info!("Found '{}' @ {}", name, address);
                found.push((DiscoveredDevice { name, address }, peripheral));
            }
        }
        Ok(found)
    }

    async fn locate(&self, address: Option<&str>) -> Result<Peripheral, FurbyError> {
        let adapter = Self::adapter().await?;
        match address {
            Some(address) => {
                adapter.start_scan(ScanFilter::default()).await?;
                let deadline = tokio::time::Instant::now() + self.scan_timeout;
                loop {
                    for peripheral in adapter.peripherals().await? {
                        if peripheral_address(&peripheral).eq_ignore_ascii_case(address) {
                            let _ = adapter.stop_scan().await;
                            return Ok(peripheral);
                        }
                    }
                    if tokio::time::Instant::now() >= deadline {
                        let _ = adapter.stop_scan().await;
                        return Err(FurbyError::Transport(format!(
                            "No device with address {address} found"
                        )));
                    }
                    tokio::time::sleep(Duration::from_millis(250)).await;
                }
            }
            None => self
                .scan(&adapter)
                .await?
                .into_iter()
                .next()
                .map(|(_, peripheral)| peripheral)
                .ok_or_else(|| {
                    FurbyError::Transport(format!(
                        "No device named '{}' found",
                        self.name_filter
                    ))
                }),
        }
    }
}

/// Runs `connect` under `timeout`, then `prepare`. Once a connect attempt has
/// started the OS may hold a link, so any failure runs `abandon` before the
/// error is returned.
async fn establish<C, P, A>(
    timeout: Duration,
    connect: C,
    prepare: P,
    abandon: A,
) -> Result<(), FurbyError>
where
    C: Future<Output = Result<(), FurbyError>>,
    P: Future<Output = Result<(), FurbyError>>,
    A: Future<Output = ()>,
{
    let result = match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(())) => prepare.await,
        Ok(Err(e)) => Err(e),
        Err(_) => Err(FurbyError::Transport(format!(
            "BLE connect timed out after {timeout:?}"
        ))),
    };
    if result.is_err() {
        abandon.await;
    }
    result
}

/// Verifies a fresh connection and loads its GATT table.
async fn prepare(peripheral: &Peripheral) -> Result<(), FurbyError> {
    if !peripheral.is_connected().await? {
        return Err(FurbyError::Transport("Failed to connect".into()));
    }
    peripheral.discover_services().await?;
    Ok(())
}

/// Drops a half-open connection after a failed connect.
async fn abandon(peripheral: &Peripheral) {
    if let Err(e) = peripheral.disconnect().await {
        debug!("Cleanup disconnect after failed connect also failed: {}", e);
    }
}

fn peripheral_address(peripheral: &Peripheral) -> String {
    // CoreBluetooth hides MAC addresses; the peripheral id is the stable handle there.
    if cfg!(target_os = "macos") {
        peripheral.id().to_string()
    } else {
        peripheral.address().to_string()
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn connect(
        &self,
        address: Option<&str>,
        timeout: Duration,
    ) -> Result<String, FurbyError> {
        let mut link = self.link.lock().await;
        if link.is_some() {
            return Err(FurbyError::InvalidState("already connected".into()));
        }

        let peripheral = self.locate(address).await?;
        establish(
            timeout,
            async { peripheral.connect().await.map_err(FurbyError::from) },
            prepare(&peripheral),
            abandon(&peripheral),
        )
        .await?;

        let resolved = peripheral_address(&peripheral);
        info!("Connected to device @ {}", resolved);
        *link = Some(BleLink {
            characteristics: peripheral.characteristics(),
            peripheral,
            forwarders: HashMap::new(),
        });
        Ok(resolved)
    }

    async fn write(&self, channel: ChannelId, data: &[u8]) -> Result<(), FurbyError> {
        let link = self.link.lock().await;
        let link = link
            .as_ref()
            .ok_or_else(|| FurbyError::TransportWrite("not connected".into()))?;
        let characteristic = link
            .characteristic(channel)
            .map_err(|e| FurbyError::TransportWrite(e.to_string()))?;
        link.peripheral
            .write(&characteristic, data, WriteType::WithResponse)
            .await
            .map_err(|e| FurbyError::TransportWrite(e.to_string()))
    }

    async fn subscribe(
        &self,
        channel: ChannelId,
        handler: NotificationHandler,
    ) -> Result<(), FurbyError> {
        let mut link = self.link.lock().await;
        let link = link
            .as_mut()
            .ok_or_else(|| FurbyError::Transport("cannot subscribe while disconnected".into()))?;
        let characteristic = link.characteristic(channel)?;

        // Grab the stream before enabling notifications so nothing is missed.
        let mut notifications = link.peripheral.notifications().await?;
        link.peripheral.subscribe(&characteristic).await?;

        let forwarder = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid == channel {
                    handler(Bytes::from(notification.value));
                }
            }
            debug!("Notification stream for {} ended.", channel);
        });
        if let Some(previous) = link.forwarders.insert(channel, forwarder) {
            previous.abort();
        }
        Ok(())
    }

    async fn unsubscribe(&self, channel: ChannelId) -> Result<(), FurbyError> {
        let mut link = self.link.lock().await;
        let Some(link) = link.as_mut() else {
            return Ok(());
        };
        if let Some(forwarder) = link.forwarders.remove(&channel) {
            forwarder.abort();
        }
        let characteristic = link.characteristic(channel)?;
        link.peripheral.unsubscribe(&characteristic).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), FurbyError> {
        let Some(link) = self.link.lock().await.take() else {
            return Ok(());
        };
        for (_, forwarder) in link.forwarders {
            forwarder.abort();
        }
        if link.peripheral.is_connected().await.unwrap_or(false) {
            if let Err(e) = link.peripheral.disconnect().await {
                warn!("BLE disconnect failed: {}", e);
                return Err(e.into());
            }
        }
        info!("Disconnected from device.");
        Ok(())
    }
}
