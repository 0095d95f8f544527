//! Host implementations of the driver boundary.
//!
//! On a host the "radio" is the OS network stack, the OTA partition is a
//! staging directory, and a restart rebuilds the device lifecycle in-process.

use super::{
    ByteStream, DriverError, FirmwareStore, HeapStats, HttpClient, HttpError, HttpResponse,
    LinkStatus, SystemControl, WifiDriver,
};
use std::cell::Cell;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, info, warn};

const PROBE_TARGET: ([u8; 4], u16) = ([1, 1, 1, 1], 53);
const STAGED_IMAGE: &str = "firmware.bin.partial";
const BOOT_IMAGE: &str = "firmware.bin";

/// Link driver backed by the host's routing table. "Associated" means the OS
/// can route to a public address; no packets are sent.
pub struct HostLink {
    probe_target: SocketAddr,
    requested: bool,
}

impl HostLink {
    pub fn new() -> Self {
        Self {
            probe_target: SocketAddr::from(PROBE_TARGET),
            requested: false,
        }
    }

    fn probe(&self) -> Option<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect(self.probe_target).ok()?;
        let ip = socket.local_addr().ok()?.ip();
        (!ip.is_unspecified()).then_some(ip)
    }
}

impl Default for HostLink {
    fn default() -> Self {
        Self::new()
    }
}

impl WifiDriver for HostLink {
    fn init_station(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn begin(&mut self, ssid: &str, _password: &str) {
        debug!("Host link association requested for '{}'", ssid);
        self.requested = true;
    }

    fn disconnect(&mut self) {
        self.requested = false;
    }

    fn status(&self) -> LinkStatus {
        if !self.requested {
            return LinkStatus::Idle;
        }
        match self.probe() {
            Some(_) => LinkStatus::Connected,
            None => LinkStatus::Disconnected,
        }
    }

    fn local_ip(&self) -> Option<IpAddr> {
        if self.requested {
            self.probe()
        } else {
            None
        }
    }

    fn rssi(&self) -> Option<i32> {
        None
    }
}

/// Staging directory standing in for the OTA partition.
pub struct FileFirmwareStore {
    dir: PathBuf,
    staged: Option<File>,
    expected: usize,
    written: usize,
}

impl FileFirmwareStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            staged: None,
            expected: 0,
            written: 0,
        }
    }

    fn staged_path(&self) -> PathBuf {
        self.dir.join(STAGED_IMAGE)
    }

    pub fn boot_image_path(&self) -> PathBuf {
        self.dir.join(BOOT_IMAGE)
    }
}

impl FirmwareStore for FileFirmwareStore {
    fn begin(&mut self, total: usize) -> Result<(), DriverError> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| DriverError::Flash(format!("Failed to create staging dir: {}", e)))?;
        let file = File::create(self.staged_path())
            .map_err(|e| DriverError::Flash(format!("Failed to open staging image: {}", e)))?;
        self.staged = Some(file);
        self.expected = total;
        self.written = 0;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> usize {
        let Some(file) = self.staged.as_mut() else {
            return 0;
        };
        match file.write_all(data) {
            Ok(()) => {
                self.written += data.len();
                data.len()
            }
            Err(e) => {
                warn!("Staging write failed: {}", e);
                0
            }
        }
    }

    fn finalize(&mut self) -> Result<(), DriverError> {
        let file = self
            .staged
            .take()
            .ok_or_else(|| DriverError::Flash("No staged image".to_string()))?;
        file.sync_all()
            .map_err(|e| DriverError::Flash(format!("Failed to sync staging image: {}", e)))?;
        drop(file);

        if self.written != self.expected {
            let _ = fs::remove_file(self.staged_path());
            return Err(DriverError::Flash(format!(
                "Image size mismatch: {} of {} bytes",
                self.written, self.expected
            )));
        }

        fs::rename(self.staged_path(), self.boot_image_path())
            .map_err(|e| DriverError::Flash(format!("Failed to activate image: {}", e)))?;
        info!("Image marked bootable: {}", self.boot_image_path().display());
        Ok(())
    }

    fn abort(&mut self) {
        self.staged = None;
        if let Err(e) = fs::remove_file(self.staged_path()) {
            debug!("No staged image to discard: {}", e);
        }
        self.written = 0;
    }
}

pub struct ReqwestHttpClient {
    client: reqwest::blocking::Client,
}

impl ReqwestHttpClient {
    pub fn new(timeout: Duration) -> Result<Self, HttpError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HttpError::Request(e.to_string()))?;
        Ok(Self { client })
    }
}

struct ResponseStream(reqwest::blocking::Response);

impl ByteStream for ResponseStream {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, HttpError> {
        self.0.read(buf).map_err(|e| HttpError::Read(e.to_string()))
    }
}

impl HttpClient for ReqwestHttpClient {
    fn get(&mut self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse, HttpError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request
            .send()
            .map_err(|e| HttpError::Request(e.to_string()))?;

        Ok(HttpResponse {
            status: response.status().as_u16(),
            content_length: response.content_length(),
            body: Box::new(ResponseStream(response)),
        })
    }
}

/// Restart requests raise a flag the run loop watches.
pub struct HostSystem {
    restart_requested: Rc<Cell<bool>>,
}

impl HostSystem {
    pub fn new() -> (Self, Rc<Cell<bool>>) {
        let flag = Rc::new(Cell::new(false));
        (
            Self {
                restart_requested: flag.clone(),
            },
            flag,
        )
    }
}

impl SystemControl for HostSystem {
    fn restart(&mut self) {
        info!("Restart requested");
        self.restart_requested.set(true);
    }

    fn heap_stats(&self) -> Option<HeapStats> {
        None
    }
}
