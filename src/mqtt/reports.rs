//! JSON payloads the device publishes about itself.

use crate::error::{ErrorCategory, ErrorCode};
use crate::hal::HeapStats;
use serde::Serialize;

/// Heartbeat, retained on `<device>/status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport<'a> {
    pub status: &'static str,
    pub uptime: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,
    pub state: &'a str,
    pub version: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heap: Option<HeapStats>,
}

/// Update progress on `<device>/update`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProgressReport<'a> {
    pub status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<&'a str>,
}

impl<'a> ProgressReport<'a> {
    pub fn status(status: &'a str) -> Self {
        Self {
            status,
            progress: None,
            version: None,
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    pub fn with_version(mut self, version: &'a str) -> Self {
        self.version = Some(version);
        self
    }
}

/// Fault report, retained on `<device>/error`.
#[derive(Debug, Clone, Serialize)]
pub struct FaultReport<'a> {
    pub status: &'static str,
    pub code: u8,
    pub error: &'static str,
    pub category: ErrorCategory,
    pub message: &'a str,
    pub source: &'a str,
    pub attempts: u8,
    pub time: String,
}

impl<'a> FaultReport<'a> {
    pub fn new(code: ErrorCode, message: &'a str, source: &'a str, attempts: u8) -> Self {
        Self {
            status: "error",
            code: code.code(),
            error: code.as_str(),
            category: code.category(),
            message,
            source,
            attempts,
            time: chrono::Local::now().to_rfc3339(),
        }
    }

    pub fn unrecoverable(mut self) -> Self {
        self.status = "unrecoverable";
        self
    }
}
