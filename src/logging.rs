//! Logging setup.
//!
//! All subsystems log through `tracing`; the event target (module path)
//! identifies the source. This module only installs the subscriber.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_tracing_level(self) -> Level {
        match self {
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warning => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "0" => Ok(LogLevel::Debug),
            "info" | "1" => Ok(LogLevel::Info),
            "warning" | "warn" | "2" => Ok(LogLevel::Warning),
            "error" | "3" => Ok(LogLevel::Error),
            other => Err(format!("Invalid log level: '{}'", other)),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        };
        write!(f, "{}", name)
    }
}

/// Installs the global fmt subscriber. `level` is the raw config value;
/// anything unparseable falls back to INFO.
pub fn setup_logging(level: &str) -> LogLevel {
    let (resolved, rejected) = match level.parse::<LogLevel>() {
        Ok(level) => (level, None),
        Err(e) => (LogLevel::Info, Some(e)),
    };

    FmtSubscriber::builder()
        .with_max_level(resolved.as_tracing_level())
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    if let Some(e) = rejected {
        warn!("{} - changing to default: {}", e, resolved);
    }
    resolved
}
