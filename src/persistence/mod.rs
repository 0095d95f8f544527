//! # Persistence Module
//!
//! Configuration collaborator of the device core. The core reads one
//! immutable [`DeviceConfig`] snapshot at boot; everything about where that
//! snapshot lives and when it is rewritten stays in here.
//!
//! ## Error Handling Strategy
//! File operations return `color_eyre` reports with context. A missing or
//! corrupted runtime snapshot is not an error: it is re-seeded from the
//! desired configuration.

pub mod config_store;

use crate::config::DeviceConfig;
use serde::{Deserialize, Serialize};

/// On-disk form of the runtime snapshot.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct PersistedSnapshot {
    /// Fingerprint of the desired config this snapshot was taken from.
    pub fingerprint: String,
    pub config: DeviceConfig,
}
