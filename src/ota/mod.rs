//! # Over-the-air Update
//!
//! Building blocks used by the Update state:
//!
//! ```text
//! ota/
//! ├── version.rs  - Strict major.minor.patch comparison
//! ├── release.rs  - Release descriptor and request headers
//! └── image.rs    - Typestate flash image writer
//! ```
//!
//! Soft outcomes ("no releases", "up to date", "no firmware asset") are not
//! errors. Everything in [`UpdateError`] aborts the session and is reported
//! as `UPDATE_FAILED`.

pub mod image;
pub mod release;
pub mod version;

use crate::error::ErrorCode;
use crate::hal::{DriverError, HttpError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    #[error("Failed to parse update info: {0}")]
    Descriptor(#[from] serde_json::Error),

    #[error("No download URL available")]
    NoDownloadUrl,

    #[error("Firmware size unknown")]
    UnknownSize,

    #[error("Flash error: {0}")]
    Flash(#[from] DriverError),

    #[error("Error writing to flash: {written} of {expected} bytes accepted")]
    ShortWrite { expected: usize, written: usize },

    #[error("Stream delivered {received} bytes, more than the announced {total}")]
    Oversized { received: usize, total: usize },

    #[error("Stream closed after {received} of {total} bytes")]
    StreamClosed { received: usize, total: usize },

    #[error("Image incomplete: {written} of {total} bytes")]
    Incomplete { written: usize, total: usize },
}

impl UpdateError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::UpdateFailed
    }
}
