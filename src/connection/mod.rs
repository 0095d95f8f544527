//! # Connection Manager
//!
//! Owns link-layer association to the single configured network endpoint.
//!
//! ```text
//! Uninitialized ──begin──► Disconnected ──connect──► Connecting
//!                               ▲                      │
//!                      link lost│        ┌─────────────┼──────────────┬───────────────────┐
//!                               │        ▼             ▼              ▼                   ▼
//!                           Connected  ConnectionFailed  WrongCredentials  NoEndpointAvailable
//! ```
//!
//! `connect()` is attempt 1. Every `check_interval` that passes without a
//! link-up signal counts one more attempt; reaching `max_connection_attempts`
//! is a hard stop. The three failure states are terminal until the owner calls
//! `connect()` again.

use crate::clock::{has_elapsed, Millis};
use crate::config::WifiConfig;
use crate::error::ErrorCode;
use crate::hal::{DriverError, LinkStatus, WifiDriver};
use std::fmt;
use std::net::IpAddr;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Disconnected,
    Connecting,
    Connected,
    ConnectionFailed,
    WrongCredentials,
    NoEndpointAvailable,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ConnectionState::Uninitialized => "UNINITIALIZED",
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::ConnectionFailed => "CONNECTION_FAILED",
            ConnectionState::WrongCredentials => "WRONG_PASSWORD",
            ConnectionState::NoEndpointAvailable => "NO_SSID_AVAILABLE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("No {0} configured")]
    MissingCredentials(&'static str),

    #[error("Radio initialization failed: {0}")]
    Driver(#[from] DriverError),

    #[error("Connection manager not initialized")]
    NotInitialized,

    #[error("Failed to connect to '{ssid}' after {attempts} attempts")]
    AttemptsExhausted { ssid: String, attempts: u8 },

    #[error("Access point '{0}' rejected the credentials")]
    WrongCredentials(String),

    #[error("Access point '{0}' not found")]
    NoEndpoint(String),
}

impl ConnectionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ConnectionError::MissingCredentials(_) => ErrorCode::ConfigInvalid,
            ConnectionError::Driver(e) => e.code(),
            ConnectionError::NotInitialized => ErrorCode::WifiInitFailed,
            ConnectionError::AttemptsExhausted { .. } => ErrorCode::WifiConnectionFailed,
            ConnectionError::WrongCredentials(_) => ErrorCode::WifiWrongPassword,
            ConnectionError::NoEndpoint(_) => ErrorCode::WifiNoSsid,
        }
    }
}

pub struct ConnectionManager {
    driver: Box<dyn WifiDriver>,
    config: WifiConfig,
    state: ConnectionState,
    attempts: u8,
    last_attempt: Millis,
    /// Set when an established link drops; drives auto-reconnect.
    lost_at: Option<Millis>,
}

impl ConnectionManager {
    pub fn new(driver: Box<dyn WifiDriver>, config: WifiConfig) -> Self {
        Self {
            driver,
            config,
            state: ConnectionState::Uninitialized,
            attempts: 0,
            last_attempt: 0,
            lost_at: None,
        }
    }

    /// Validates credentials and puts the radio into station mode.
    pub fn begin(&mut self) -> Result<(), ConnectionError> {
        debug!("Initializing connection manager...");

        if self.config.ssid.is_empty() {
            warn!("No SSID available, skipping connection manager initialization");
            return Err(ConnectionError::MissingCredentials("SSID"));
        }
        if self.config.password.is_empty() {
            warn!("No password available, skipping connection manager initialization");
            return Err(ConnectionError::MissingCredentials("password"));
        }

        self.driver.init_station()?;
        if self.state == ConnectionState::Uninitialized {
            self.set_state(ConnectionState::Disconnected);
        }
        Ok(())
    }

    pub fn connect(&mut self, now: Millis) -> Result<(), ConnectionError> {
        match self.state {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Uninitialized => return Err(ConnectionError::NotInitialized),
            _ => {}
        }

        debug!("Attempting to connect to access point '{}'", self.config.ssid);
        self.driver.begin(&self.config.ssid, &self.config.password);
        self.last_attempt = now;
        self.attempts = 1;
        self.lost_at = None;
        self.set_state(ConnectionState::Connecting);
        Ok(())
    }

    pub fn disconnect(&mut self) {
        debug!("Disconnecting from access point...");
        self.driver.disconnect();
        self.lost_at = None;
        if self.state != ConnectionState::Uninitialized {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Polled every tick. An error is returned once, on the tick the manager
    /// enters a failure state.
    pub fn update(&mut self, now: Millis) -> Result<(), ConnectionError> {
        match self.state {
            ConnectionState::Connecting => self.poll_connecting(now),
            ConnectionState::Connected => {
                if self.driver.status() != LinkStatus::Connected {
                    warn!("Lost connection to access point '{}'", self.config.ssid);
                    self.lost_at = Some(now);
                    self.set_state(ConnectionState::Disconnected);
                }
                Ok(())
            }
            ConnectionState::Disconnected => {
                if let Some(lost_at) = self.lost_at {
                    if self.config.auto_reconnect
                        && has_elapsed(now, lost_at, self.config.reconnect_interval)
                    {
                        info!("Auto-reconnecting to '{}'", self.config.ssid);
                        self.connect(now)?;
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn poll_connecting(&mut self, now: Millis) -> Result<(), ConnectionError> {
        match self.driver.status() {
            LinkStatus::Connected => {
                self.attempts = 0;
                self.set_state(ConnectionState::Connected);
                match self.driver.local_ip() {
                    Some(ip) => info!("Connected to access point with IP: {}", ip),
                    None => info!("Connected to access point"),
                }
                return Ok(());
            }
            LinkStatus::AuthFailed => {
                error!("Access point '{}' rejected the credentials", self.config.ssid);
                self.set_state(ConnectionState::WrongCredentials);
                return Err(ConnectionError::WrongCredentials(self.config.ssid.clone()));
            }
            LinkStatus::NoEndpoint => {
                error!("Access point '{}' not available", self.config.ssid);
                self.set_state(ConnectionState::NoEndpointAvailable);
                return Err(ConnectionError::NoEndpoint(self.config.ssid.clone()));
            }
            _ => {}
        }

        if !has_elapsed(now, self.last_attempt, self.config.check_interval) {
            return Ok(());
        }

        self.last_attempt = now;
        self.attempts = self.attempts.saturating_add(1);
        debug!(
            "Connection attempts: {} ({})",
            self.attempts, self.config.max_connection_attempts
        );

        if self.attempts >= self.config.max_connection_attempts {
            error!(
                "Failed to connect to access point ('{}') due to reaching max connection attempts",
                self.config.ssid
            );
            self.driver.disconnect();
            self.set_state(ConnectionState::ConnectionFailed);
            return Err(ConnectionError::AttemptsExhausted {
                ssid: self.config.ssid.clone(),
                attempts: self.attempts,
            });
        }
        Ok(())
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state != next {
            info!("Connection state: {} -> {}", self.state, next);
            self.state = next;
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.driver.status() == LinkStatus::Connected
    }

    pub fn attempts(&self) -> u8 {
        self.attempts
    }

    pub fn local_ip(&self) -> Option<IpAddr> {
        self.driver.local_ip()
    }

    pub fn rssi(&self) -> Option<i32> {
        self.driver.rssi()
    }
}
