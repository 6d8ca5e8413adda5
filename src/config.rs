// src/config.rs

//! Manages controller configuration: loading, defaults, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// Notifications from the device arrive on this characteristic.
pub const DEFAULT_RX_CHARACTERISTIC: Uuid = Uuid::from_u128(0xdab91382_b5a1_e29c_b041_bcd562613bde);
/// Commands are written to this characteristic.
pub const DEFAULT_TX_CHARACTERISTIC: Uuid = Uuid::from_u128(0xdab91383_b5a1_e29c_b041_bcd562613bde);

/// How to find and talk to the peripheral.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DeviceConfig {
    /// A fixed peripheral address. When unset the controller scans for `name_filter`.
    #[serde(default)]
    pub address: Option<String>,
    /// Substring matched against advertised local names while scanning.
    #[serde(default = "default_name_filter")]
    pub name_filter: String,
    #[serde(with = "humantime_serde", default = "default_scan_timeout")]
    pub scan_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    #[serde(default = "default_rx_characteristic")]
    pub rx_characteristic: Uuid,
    #[serde(default = "default_tx_characteristic")]
    pub tx_characteristic: Uuid,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: None,
            name_filter: default_name_filter(),
            scan_timeout: default_scan_timeout(),
            connect_timeout: default_connect_timeout(),
            rx_characteristic: default_rx_characteristic(),
            tx_characteristic: default_tx_characteristic(),
        }
    }
}

/// Timing of the keep-alive watchdog.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct KeepAliveConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// A keep-alive is sent once the link has been idle for longer than this.
    #[serde(with = "humantime_serde", default = "default_idle_threshold")]
    pub idle_threshold: Duration,
    /// How long to wait for the keep-alive acknowledgment.
    #[serde(with = "humantime_serde", default = "default_response_timeout")]
    pub response_timeout: Duration,
    /// Pause after a keep-alive attempt before checking again.
    #[serde(with = "humantime_serde", default = "default_active_interval")]
    pub active_interval: Duration,
    /// Pause between idle checks while the link is busy.
    #[serde(with = "humantime_serde", default = "default_idle_check_interval")]
    pub idle_check_interval: Duration,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            idle_threshold: default_idle_threshold(),
            response_timeout: default_response_timeout(),
            active_interval: default_active_interval(),
            idle_check_interval: default_idle_check_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_name_filter() -> String {
    "Furby".to_string()
}
fn default_scan_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_rx_characteristic() -> Uuid {
    DEFAULT_RX_CHARACTERISTIC
}
fn default_tx_characteristic() -> Uuid {
    DEFAULT_TX_CHARACTERISTIC
}
fn default_idle_threshold() -> Duration {
    Duration::from_secs(3)
}
fn default_response_timeout() -> Duration {
    Duration::from_secs(2)
}
fn default_active_interval() -> Duration {
    Duration::from_secs(1)
}
fn default_idle_check_interval() -> Duration {
    Duration::from_millis(500)
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_action_list() -> String {
    "actionlist.json".to_string()
}

/// The top-level configuration file.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Path of the JSON action list shown by the `actions` command.
    #[serde(default = "default_action_list")]
    pub action_list: String,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub keepalive: KeepAliveConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            action_list: default_action_list(),
            device: DeviceConfig::default(),
            keepalive: KeepAliveConfig::default(),
        }
    }
}

impl Config {
    /// Loads and validates the configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid config in '{path}'"))
    }

    /// Parses and validates configuration from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration to ensure logical consistency.
    fn validate(&self) -> Result<()> {
        let ka = &self.keepalive;
        if ka.idle_threshold.is_zero() {
            return Err(anyhow!("keepalive.idle_threshold cannot be 0"));
        }
        if ka.response_timeout.is_zero() {
            return Err(anyhow!("keepalive.response_timeout cannot be 0"));
        }
        if ka.idle_check_interval.is_zero() || ka.active_interval.is_zero() {
            return Err(anyhow!("keepalive intervals cannot be 0"));
        }
        if self.device.connect_timeout.is_zero() {
            return Err(anyhow!("device.connect_timeout cannot be 0"));
        }
        if self.device.address.is_none() && self.device.name_filter.trim().is_empty() {
            return Err(anyhow!(
                "device.name_filter cannot be empty when no device.address is set"
            ));
        }
        if self.device.rx_characteristic == self.device.tx_characteristic {
            warn!("rx and tx characteristics are identical; notifications may echo writes.");
        }
        if ka.enabled && ka.response_timeout + ka.active_interval > ka.idle_threshold * 2 {
            warn!(
                "keep-alive response timeout {:?} is long compared to the idle threshold {:?}.",
                ka.response_timeout, ka.idle_threshold
            );
        }
        Ok(())
    }
}
