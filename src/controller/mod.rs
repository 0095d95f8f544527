//! # Device Controller
//!
//! The top-level lifecycle state machine and the services its states share.
//!
//! ```text
//!            ┌────────── recovered ───────────┐
//!            ▼                                │
//! Setup ──► Action ──► Update ──► (restart)   │
//!   │  ▲      │  ▲       │                    │
//!   │  │      ▼  │       ▼                    │
//!   │  └──── Idle ◄──── Error ────────────────┘
//!   └─────────────────────▲
//!              any fault ─┘
//! ```
//!
//! States never switch themselves. `update` hands a [`Transition`] back to
//! [`Device`], which exits the old state before entering the new one.

pub mod device;
pub mod states;

pub use device::Device;

use crate::clock::{has_elapsed, Clock, Millis};
use crate::config::{DeviceConfig, DeviceIdentity};
use crate::connection::ConnectionManager;
use crate::error::ErrorCode;
use crate::hal::{FirmwareStore, HttpClient, SystemControl, WifiDriver};
use crate::mqtt::{MessagingManager, MqttTransport};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateId {
    Setup,
    Idle,
    Action,
    Error,
    Update,
}

impl StateId {
    pub fn as_str(self) -> &'static str {
        match self {
            StateId::Setup => "SETUP",
            StateId::Idle => "IDLE",
            StateId::Action => "ACTION",
            StateId::Error => "ERROR",
            StateId::Update => "UPDATE",
        }
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    To(StateId),
    /// Enter Error with this fault; the active state is recorded as its source.
    Fault { code: ErrorCode, message: String },
}

impl Transition {
    pub fn fault(code: ErrorCode, message: impl Into<String>) -> Self {
        Transition::Fault {
            code,
            message: message.into(),
        }
    }
}

/// Lifecycle hooks every device state implements.
pub trait DeviceState {
    fn id(&self) -> StateId;
    fn enter(&mut self, services: &mut Services);
    /// Called once per tick while active.
    fn update(&mut self, services: &mut Services) -> Option<Transition>;
    fn exit(&mut self, services: &mut Services);
}

/// Everything the states share, constructed once per boot.
pub struct Services {
    pub config: DeviceConfig,
    pub identity: DeviceIdentity,
    pub clock: Box<dyn Clock>,
    pub wifi: ConnectionManager,
    pub mqtt: MessagingManager,
    pub http: Box<dyn HttpClient>,
    pub flash: Box<dyn FirmwareStore>,
    pub system: Box<dyn SystemControl>,
    /// Set by a remote request; forces the next update check.
    pub update_requested: bool,
    pub last_update_check: Option<Millis>,
}

impl Services {
    pub fn new(
        config: DeviceConfig,
        clock: Box<dyn Clock>,
        wifi: Box<dyn WifiDriver>,
        transport: Box<dyn MqttTransport>,
        http: Box<dyn HttpClient>,
        flash: Box<dyn FirmwareStore>,
        system: Box<dyn SystemControl>,
    ) -> Self {
        let identity = config.identity();
        Self {
            wifi: ConnectionManager::new(wifi, config.wifi.clone()),
            mqtt: MessagingManager::new(transport, config.mqtt.clone(), &identity),
            identity,
            config,
            clock,
            http,
            flash,
            system,
            update_requested: false,
            last_update_check: None,
        }
    }

    pub fn now(&self) -> Millis {
        self.clock.now_ms()
    }

    /// Whether an update cycle may start now.
    pub fn update_check_due(&self, now: Millis) -> bool {
        if !self.config.update.enabled() {
            return false;
        }
        self.update_requested
            || self
                .last_update_check
                .map_or(true, |last| has_elapsed(now, last, self.config.update.interval))
    }
}
