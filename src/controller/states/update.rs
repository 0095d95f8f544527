//! # Update Controller
//!
//! One update session per visit to the Update state:
//!
//! ```text
//! CheckVersion ──newer release──► Download ──all bytes written──► Install ──► Completed
//!      │                             │                               │            │
//!      └─ soft outcome ─► Action     └───────── error ──► Failed ◄───┘        restart
//!                                                          │
//!                                                          └──► Error (UPDATE_FAILED)
//! ```
//!
//! The download is streamed straight into the flash staging area, at most
//! `chunks_per_tick` chunks of `chunk_size` bytes per tick. Any stream or
//! flash problem aborts the staged image before the session reaches Failed.

use crate::clock::Millis;
use crate::controller::{DeviceState, Services, StateId, Transition};
use crate::error::ErrorCode;
use crate::hal::ByteStream;
use crate::mqtt::reports::ProgressReport;
use crate::mqtt::topic;
use crate::ota::image::{ImageWriter, Staging};
use crate::ota::release::{descriptor_headers, ReleaseDescriptor};
use crate::ota::version::{is_newer, CURRENT_VERSION};
use crate::ota::UpdateError;
use tracing::{debug, error, info, warn};

const DESCRIPTOR_LIMIT: usize = 64 * 1024;
const HTTP_OK: u16 = 200;
const HTTP_NOT_FOUND: u16 = 404;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    CheckVersion,
    Download,
    Install,
    Completed,
    Failed,
}

#[derive(Debug)]
struct UpdateSession {
    phase: UpdatePhase,
    version: Option<String>,
    download_url: String,
    total: usize,
    consumed: usize,
    started_at: Millis,
    failure: Option<String>,
    restart_issued: bool,
}

impl UpdateSession {
    fn new(started_at: Millis) -> Self {
        Self {
            phase: UpdatePhase::CheckVersion,
            version: None,
            download_url: String::new(),
            total: 0,
            consumed: 0,
            started_at,
            failure: None,
            restart_issued: false,
        }
    }
}

struct Download {
    body: Box<dyn ByteStream>,
    writer: ImageWriter<Staging>,
}

enum CheckOutcome {
    Available { version: String, url: String },
    Skipped,
}

#[derive(Default)]
pub struct UpdateState {
    session: Option<UpdateSession>,
    download: Option<Download>,
    buffer: Vec<u8>,
}

impl UpdateState {
    pub fn phase(&self) -> Option<UpdatePhase> {
        self.session.as_ref().map(|s| s.phase)
    }

    fn report(&self, services: &mut Services, status: &str, progress: Option<u8>) {
        let version = self.session.as_ref().and_then(|s| s.version.as_deref());
        match progress {
            Some(p) => info!("{} ({}%)", status, p),
            None => info!("{}", status),
        }

        if !services.mqtt.is_connected() {
            return;
        }

        let mut report = ProgressReport::status(status);
        if let Some(p) = progress {
            report = report.with_progress(p);
        }
        if let Some(v) = version {
            report = report.with_version(v);
        }
        if let Err(e) = services.mqtt.publish_json(topic::UPDATE, &report, false) {
            warn!("Failed to publish update progress: {}", e);
        }
    }

    fn check_latest_release(&self, services: &mut Services) -> Result<CheckOutcome, UpdateError> {
        let url = services.config.update.api_url.clone();
        let headers = descriptor_headers(
            &services.config.update.api_token,
            &services.identity.client_id(),
        );
        let header_refs: Vec<(&str, &str)> =
            headers.iter().map(|(k, v)| (*k, v.as_str())).collect();

        let response = services.http.get(&url, &header_refs)?;
        if response.status == HTTP_NOT_FOUND {
            self.report(services, "No releases found", None);
            return Ok(CheckOutcome::Skipped);
        }
        if response.status != HTTP_OK {
            return Err(UpdateError::Status(response.status));
        }

        let body = response.text(DESCRIPTOR_LIMIT)?;
        if body.trim().is_empty() {
            self.report(services, "Empty response from update server", None);
            return Ok(CheckOutcome::Skipped);
        }

        let descriptor = ReleaseDescriptor::parse(&body)?;
        if descriptor.tag_name.is_empty() {
            self.report(services, "No version tag found", None);
            return Ok(CheckOutcome::Skipped);
        }

        let asset_name = services.config.update.asset_name.clone();
        let Some(asset) = descriptor.asset(&asset_name) else {
            self.report(services, "No firmware found in release", None);
            return Ok(CheckOutcome::Skipped);
        };

        if !is_newer(CURRENT_VERSION, &descriptor.tag_name) {
            let status = format!("Current version up to date ({})", CURRENT_VERSION);
            self.report(services, &status, None);
            return Ok(CheckOutcome::Skipped);
        }

        Ok(CheckOutcome::Available {
            version: descriptor.tag_name.clone(),
            url: asset.browser_download_url.clone(),
        })
    }

    fn open_download(&mut self, services: &mut Services, url: &str) -> Result<(), UpdateError> {
        if url.is_empty() {
            return Err(UpdateError::NoDownloadUrl);
        }

        let user_agent = services.identity.client_id();
        let response = services.http.get(url, &[("User-Agent", user_agent.as_str())])?;
        if response.status != HTTP_OK {
            return Err(UpdateError::Status(response.status));
        }

        let total = response
            .content_length
            .and_then(|len| usize::try_from(len).ok())
            .ok_or(UpdateError::UnknownSize)?;
        let writer = ImageWriter::<Staging>::begin(services.flash.as_mut(), total)?;

        if let Some(session) = self.session.as_mut() {
            session.total = total;
            session.consumed = 0;
        }
        self.download = Some(Download {
            body: response.body,
            writer,
        });
        Ok(())
    }

    /// Moves up to `chunks_per_tick` chunks from the stream into flash.
    fn stream_chunks(&mut self, services: &mut Services) -> Result<(), UpdateError> {
        let chunk_size = services.config.update.chunk_size.max(1);
        let chunks = services.config.update.chunks_per_tick.max(1);
        self.buffer.resize(chunk_size, 0);

        for _ in 0..chunks {
            let Some(download) = self.download.as_mut() else {
                return Ok(());
            };
            if download.writer.is_complete() {
                break;
            }

            let remaining = download.writer.total() - download.writer.written();
            let want = remaining.min(chunk_size);
            let read = download.body.read_chunk(&mut self.buffer[..want])?;
            if read == 0 {
                return Err(UpdateError::StreamClosed {
                    received: download.writer.written(),
                    total: download.writer.total(),
                });
            }

            download
                .writer
                .write_chunk(services.flash.as_mut(), &self.buffer[..read])?;
            let progress = download.writer.progress();
            let consumed = download.writer.written();

            if let Some(session) = self.session.as_mut() {
                session.consumed = consumed;
            }
            self.report(services, "Downloading", Some(progress));
        }
        Ok(())
    }

    fn abort_download(&mut self, services: &mut Services) {
        if let Some(download) = self.download.take() {
            download.writer.abort(services.flash.as_mut());
        }
    }

    fn fail(&mut self, services: &mut Services, err: UpdateError) {
        error!("Update failed: {}", err);
        self.abort_download(services);
        if let Some(session) = self.session.as_mut() {
            session.phase = UpdatePhase::Failed;
            session.failure = Some(err.to_string());
        }
    }

    fn set_phase(&mut self, phase: UpdatePhase) {
        if let Some(session) = self.session.as_mut() {
            debug!("Update phase: {:?} -> {:?}", session.phase, phase);
            session.phase = phase;
        }
    }
}

/// Polls the broker session so queued progress reports go out and the
/// session stays alive across a long download.
fn pump_messaging(services: &mut Services) {
    if !services.wifi.is_connected() {
        return;
    }
    let now = services.now();
    if let Err(e) = services.mqtt.update(now) {
        warn!("Messaging unavailable during update: {}", e);
    }
}

impl DeviceState for UpdateState {
    fn id(&self) -> StateId {
        StateId::Update
    }

    fn enter(&mut self, services: &mut Services) {
        debug!("Entering UpdateState");
        let now = services.now();
        self.download = None;

        if !services.update_check_due(now) {
            debug!("Update check not due");
            self.session = None;
            return;
        }

        services.last_update_check = Some(now);
        services.update_requested = false;
        self.session = Some(UpdateSession::new(now));
        self.report(services, "Checking for updates", None);
    }

    fn update(&mut self, services: &mut Services) -> Option<Transition> {
        pump_messaging(services);

        let phase = match self.session.as_ref() {
            Some(session) => session.phase,
            None => return Some(Transition::To(StateId::Action)),
        };

        match phase {
            UpdatePhase::CheckVersion => match self.check_latest_release(services) {
                Ok(CheckOutcome::Available { version, url }) => {
                    let status = format!("New version available: {}", version);
                    if let Some(session) = self.session.as_mut() {
                        session.version = Some(version);
                        session.download_url = url;
                    }
                    self.report(services, &status, Some(0));
                    self.set_phase(UpdatePhase::Download);
                    None
                }
                Ok(CheckOutcome::Skipped) => Some(Transition::To(StateId::Action)),
                Err(e) => {
                    let status = format!("Failed to check for updates: {}", e);
                    warn!("{}", status);
                    self.report(services, &status, None);
                    Some(Transition::To(StateId::Action))
                }
            },
            UpdatePhase::Download => {
                if self.download.is_none() {
                    let url = self
                        .session
                        .as_ref()
                        .map(|s| s.download_url.clone())
                        .unwrap_or_default();
                    if let Err(e) = self.open_download(services, &url) {
                        self.fail(services, e);
                        return None;
                    }
                    self.report(services, "Downloading", Some(0));
                }

                if let Err(e) = self.stream_chunks(services) {
                    self.fail(services, e);
                    return None;
                }

                if self
                    .download
                    .as_ref()
                    .is_some_and(|d| d.writer.is_complete())
                {
                    self.set_phase(UpdatePhase::Install);
                }
                None
            }
            UpdatePhase::Install => {
                let Some(download) = self.download.take() else {
                    self.fail(services, UpdateError::NoDownloadUrl);
                    return None;
                };
                match download.writer.finalize(services.flash.as_mut()) {
                    Ok(_) => {
                        self.report(services, "Download and installation completed", Some(100));
                        self.set_phase(UpdatePhase::Completed);
                    }
                    Err(e) => self.fail(services, e),
                }
                None
            }
            UpdatePhase::Completed => {
                let issued = self.session.as_ref().is_some_and(|s| s.restart_issued);
                if !issued {
                    self.report(services, "Update completed, restarting device...", Some(100));
                    if let Some(session) = self.session.as_mut() {
                        session.restart_issued = true;
                        info!(
                            "Update session finished in {} ms",
                            services.clock.now_ms().wrapping_sub(session.started_at)
                        );
                    }
                    services.system.restart();
                }
                None
            }
            UpdatePhase::Failed => {
                let message = self
                    .session
                    .as_ref()
                    .and_then(|s| s.failure.clone())
                    .unwrap_or_else(|| "Update failed".to_string());
                self.report(services, "Update failed", None);
                Some(Transition::fault(ErrorCode::UpdateFailed, message))
            }
        }
    }

    fn exit(&mut self, services: &mut Services) {
        debug!("Exiting UpdateState");
        self.abort_download(services);
        if let Some(session) = self.session.take() {
            debug!(
                "Update session closed in {:?} after {} of {} bytes",
                session.phase, session.consumed, session.total
            );
        }
    }
}
