//! # Configuration Store
//!
//! Two files back the device configuration:
//!
//! ```text
//! device.toml (desired)  ──► fingerprint ──┐
//!                                          ├─► changed? ──► adopt + persist
//! <config_dir>/edgenode/runtime.toml ──────┘
//!   (persisted snapshot + stored fingerprint)
//! ```
//!
//! The desired file is what an operator edits. The runtime snapshot is what
//! the device actually runs with; it only follows the desired file when the
//! fingerprint of the desired subset changes.

use super::PersistedSnapshot;
use crate::config::DeviceConfig;
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const CONFIG_DIR: &str = "edgenode";
const RUNTIME_FILE: &str = "runtime.toml";

pub struct ConfigStore {
    desired: DeviceConfig,
    runtime: DeviceConfig,
    stored_fingerprint: String,
    runtime_path: PathBuf,
}

/// The fields whose change means "the operator wants a different device".
#[derive(Serialize)]
struct DesiredSubset<'a> {
    device: &'a crate::config::DeviceSection,
    wifi: &'a crate::config::WifiConfig,
    mqtt: &'a crate::config::MqttConfig,
    error: &'a crate::config::RecoveryConfig,
    update: &'a crate::config::UpdateConfig,
}

pub fn fingerprint(config: &DeviceConfig) -> String {
    let subset = DesiredSubset {
        device: &config.device,
        wifi: &config.wifi,
        mqtt: &config.mqtt,
        error: &config.error,
        update: &config.update,
    };
    // serde_json keeps declaration order, so equal configs hash equally.
    let encoded = serde_json::to_vec(&subset).unwrap_or_default();
    hex::encode(Sha256::digest(&encoded))
}

impl ConfigStore {
    /// Opens the store with the runtime snapshot under the user config dir.
    pub async fn begin(desired_path: &Path) -> Result<Self> {
        let mut runtime_dir = get_config_dir();
        runtime_dir.push(CONFIG_DIR);
        Self::open(desired_path, &runtime_dir).await
    }

    pub async fn open(desired_path: &Path, runtime_dir: &Path) -> Result<Self> {
        let desired = load_desired(desired_path).await?;

        if !tokio::fs::try_exists(runtime_dir)
            .await
            .map_err(|e| eyre!("Failed to check if config directory exists: {}", e))?
        {
            tokio::fs::create_dir_all(runtime_dir)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }

        let runtime_path = runtime_dir.join(RUNTIME_FILE);

        match load_snapshot(&runtime_path).await {
            Some(snapshot) => {
                debug!("Loaded runtime config from {}", runtime_path.display());
                Ok(Self {
                    desired,
                    runtime: snapshot.config,
                    stored_fingerprint: snapshot.fingerprint,
                    runtime_path,
                })
            }
            None => {
                warn!("Failed to load config from storage, using desired config");
                let store = Self {
                    stored_fingerprint: fingerprint(&desired),
                    runtime: desired.clone(),
                    desired,
                    runtime_path,
                };
                store.persist().await?;
                Ok(store)
            }
        }
    }

    pub fn snapshot(&self) -> &DeviceConfig {
        &self.runtime
    }

    pub fn desired_fingerprint(&self) -> String {
        fingerprint(&self.desired)
    }

    pub fn stored_fingerprint(&self) -> &str {
        &self.stored_fingerprint
    }

    pub fn has_desired_changed(&self) -> bool {
        let desired = self.desired_fingerprint();
        debug!(
            "Desired config hash: {} - Stored config hash: {}",
            desired, self.stored_fingerprint
        );
        desired != self.stored_fingerprint
    }

    /// Adopts the desired config when it changed. Returns whether it did.
    pub async fn update_device_config(&mut self) -> Result<bool> {
        if !self.has_desired_changed() {
            return Ok(false);
        }

        self.runtime = self.desired.clone();
        self.stored_fingerprint = self.desired_fingerprint();
        self.persist().await?;
        info!("Updated device config");
        Ok(true)
    }

    pub async fn persist(&self) -> Result<()> {
        let snapshot = PersistedSnapshot {
            fingerprint: self.stored_fingerprint.clone(),
            config: self.runtime.clone(),
        };

        let content = toml::to_string_pretty(&snapshot)
            .map_err(|e| eyre!("Failed to serialize runtime config: {}", e))?;

        tokio::fs::write(&self.runtime_path, content)
            .await
            .map_err(|e| eyre!("Failed to write runtime config file: {}", e))?;

        debug!("Runtime config saved to {}", self.runtime_path.display());
        Ok(())
    }
}

async fn load_desired(path: &Path) -> Result<DeviceConfig> {
    if !tokio::fs::try_exists(path)
        .await
        .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
    {
        warn!(
            "Config file {} does not exist, using defaults",
            path.display()
        );
        return Ok(DeviceConfig::default());
    }

    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| eyre!("Failed to read config file: {}", e))?;

    toml::from_str(&content).map_err(|e| eyre!("Failed to parse config file: {}", e))
}

async fn load_snapshot(path: &Path) -> Option<PersistedSnapshot> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    match toml::from_str(&content) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            warn!("Stored runtime config is unreadable: {}", e);
            None
        }
    }
}

fn get_config_dir() -> PathBuf {
    dirs::config_dir().unwrap_or_else(|| {
        warn!("Could not determine config directory, using current directory");
        PathBuf::from(".")
    })
}
