//! Device configuration snapshot.
//!
//! Loaded once at boot by [`crate::persistence::config_store::ConfigStore`] and
//! treated as read-only by every manager and state afterwards. All intervals
//! are milliseconds on the device clock.

use crate::clock::Millis;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    pub device: DeviceSection,
    pub wifi: WifiConfig,
    pub mqtt: MqttConfig,
    pub error: RecoveryConfig,
    pub logging: LoggingConfig,
    pub update: UpdateConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DeviceSection {
    pub name: String,
    /// 0 derives a stable id from the device name.
    pub chip_id: u64,
    pub mac_address: String,
    pub status_update_interval: Millis,
    pub setup_timeout: Millis,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            name: "edgenode".to_string(),
            chip_id: 0,
            mac_address: String::new(),
            status_update_interval: 30_000,
            setup_timeout: 60_000,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct WifiConfig {
    pub ssid: String,
    pub password: String,
    pub auto_reconnect: bool,
    pub check_interval: Millis,
    pub reconnect_interval: Millis,
    pub max_connection_attempts: u8,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            password: String::new(),
            auto_reconnect: true,
            check_interval: 500,
            reconnect_interval: 5_000,
            max_connection_attempts: 20,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub retry_interval: Millis,
    pub max_connection_attempts: u8,
    pub base_topic: String,
    /// Seconds.
    pub keep_alive: u16,
    /// Upper bound for a single outgoing payload in bytes.
    pub max_payload: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: String::new(),
            port: 1883,
            user: String::new(),
            password: String::new(),
            retry_interval: 5_000,
            max_connection_attempts: 20,
            base_topic: "gpsno/devices".to_string(),
            keep_alive: 15,
            max_payload: 1024,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct RecoveryConfig {
    pub max_recovery_attempts: u8,
    pub recovery_interval: Millis,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_recovery_attempts: 3,
            recovery_interval: 5_000,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct UpdateConfig {
    /// Release descriptor endpoint. Empty disables update checks.
    pub api_url: String,
    pub api_token: String,
    pub interval: Millis,
    pub chunk_size: usize,
    pub chunks_per_tick: usize,
    pub asset_name: String,
    /// Host staging directory standing in for the OTA flash partition.
    pub firmware_dir: String,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_token: String::new(),
            interval: 3_600_000,
            chunk_size: 128,
            chunks_per_tick: 16,
            asset_name: "firmware.bin".to_string(),
            firmware_dir: "firmware".to_string(),
        }
    }
}

impl UpdateConfig {
    pub fn enabled(&self) -> bool {
        !self.api_url.trim().is_empty()
    }
}

/// Who this device is on the network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub name: String,
    pub chip_id: u64,
    pub mac_address: String,
}

impl DeviceIdentity {
    /// Stable broker client id: `<name>-<chip id hex>`.
    pub fn client_id(&self) -> String {
        format!("{}-{:x}", self.name, self.chip_id)
    }
}

impl DeviceConfig {
    pub fn identity(&self) -> DeviceIdentity {
        let chip_id = if self.device.chip_id != 0 {
            self.device.chip_id
        } else {
            derive_chip_id(&self.device.name)
        };

        let mac_address = if self.device.mac_address.is_empty() {
            format_mac(chip_id)
        } else {
            self.device.mac_address.clone()
        };

        DeviceIdentity {
            name: self.device.name.clone(),
            chip_id,
            mac_address,
        }
    }

    pub fn summary(&self) -> ConfigSummary<'_> {
        ConfigSummary(self)
    }
}

/// First 48 bits of SHA-256(name), the width of an efuse MAC.
fn derive_chip_id(name: &str) -> u64 {
    let digest = Sha256::digest(name.as_bytes());
    digest[..6]
        .iter()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte))
}

fn format_mac(chip_id: u64) -> String {
    let bytes = chip_id.to_be_bytes();
    bytes[2..]
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

fn mask(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<unset>"
    } else {
        "********"
    }
}

/// Boot-time printable view of the configuration with secrets masked.
pub struct ConfigSummary<'a>(&'a DeviceConfig);

impl fmt::Display for ConfigSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let c = self.0;
        let id = c.identity();
        writeln!(f, "Device Name: {}", id.name)?;
        writeln!(f, "Chip ID: {:x}", id.chip_id)?;
        writeln!(f, "MAC Address: {}", id.mac_address)?;
        writeln!(f, "WiFi SSID: {}", c.wifi.ssid)?;
        writeln!(f, "WiFi Password: {}", mask(&c.wifi.password))?;
        writeln!(f, "MQTT Broker: {}:{}", c.mqtt.broker, c.mqtt.port)?;
        writeln!(f, "MQTT User: {}", c.mqtt.user)?;
        writeln!(f, "MQTT Password: {}", mask(&c.mqtt.password))?;
        writeln!(f, "MQTT Retry Interval: {}", c.mqtt.retry_interval)?;
        writeln!(f, "MQTT Base Topic: {}", c.mqtt.base_topic)?;
        writeln!(f, "Log Level: {}", c.logging.level)?;
        write!(
            f,
            "Update Endpoint: {} (token {})",
            if c.update.enabled() { c.update.api_url.as_str() } else { "<disabled>" },
            mask(&c.update.api_token)
        )
    }
}
