//! Driver boundary.
//!
//! The device core never touches the radio, flash, HTTP stack or system
//! control directly. Each is a trait here; [`host`] provides implementations
//! for running the core on a networked host.
//!
//! ```text
//! ConnectionManager ──► WifiDriver
//! MessagingManager  ──► mqtt::MqttTransport
//! UpdateState       ──► HttpClient ──► ByteStream
//!                   ──► FirmwareStore
//! Device            ──► SystemControl
//! ```

pub mod host;

use crate::error::ErrorCode;
use serde::Serialize;
use std::net::IpAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Radio initialization failed: {0}")]
    RadioInit(String),

    #[error("Flash error: {0}")]
    Flash(String),
}

impl DriverError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DriverError::RadioInit(_) => ErrorCode::WifiInitFailed,
            DriverError::Flash(_) => ErrorCode::FilesystemError,
        }
    }
}

/// Link status as reported by the radio driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Idle,
    Connected,
    Disconnected,
    NoEndpoint,
    AuthFailed,
    Failed,
}

pub trait WifiDriver {
    /// Puts the radio into station mode.
    fn init_station(&mut self) -> Result<(), DriverError>;
    /// Issues a non-blocking association request.
    fn begin(&mut self, ssid: &str, password: &str);
    fn disconnect(&mut self);
    fn status(&self) -> LinkStatus;
    fn local_ip(&self) -> Option<IpAddr>;
    fn rssi(&self) -> Option<i32>;
}

/// Flash staging area for one firmware image.
pub trait FirmwareStore {
    fn begin(&mut self, total: usize) -> Result<(), DriverError>;
    /// Returns how many bytes were actually written.
    fn write(&mut self, data: &[u8]) -> usize;
    /// Verifies the staged image and marks it bootable.
    fn finalize(&mut self) -> Result<(), DriverError>;
    /// Discards the staged image.
    fn abort(&mut self);
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Stream read failed: {0}")]
    Read(String),
}

/// Pull-based response body.
pub trait ByteStream {
    /// Fills at most `buf.len()` bytes. `Ok(0)` means the stream is closed.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, HttpError>;
}

pub struct HttpResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub body: Box<dyn ByteStream>,
}

impl HttpResponse {
    /// Drains the body into a string, up to `limit` bytes.
    pub fn text(mut self, limit: usize) -> Result<String, HttpError> {
        let mut collected = Vec::new();
        let mut buf = [0u8; 512];
        loop {
            let n = self.body.read_chunk(&mut buf)?;
            if n == 0 {
                break;
            }
            if collected.len() + n > limit {
                return Err(HttpError::Read(format!(
                    "response exceeds {} bytes",
                    limit
                )));
            }
            collected.extend_from_slice(&buf[..n]);
        }
        String::from_utf8(collected).map_err(|e| HttpError::Read(e.to_string()))
    }
}

pub trait HttpClient {
    fn get(&mut self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse, HttpError>;
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct HeapStats {
    pub free: u32,
    pub min_free: u32,
    pub max_alloc: u32,
}

pub trait SystemControl {
    fn restart(&mut self);
    fn heap_stats(&self) -> Option<HeapStats>;
}
