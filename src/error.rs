//! Fault taxonomy shared by every subsystem.
//!
//! Codes are grouped by numeric range; the range alone decides the category:
//!
//! ```text
//!  1-9   system / boot        30-39 messaging
//! 10-19  configuration        40-49 sensor / hardware (reserved)
//! 20-29  connection (link)    50-59 recovery / update
//!                             99    unknown
//! ```

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum ErrorCode {
    BootFailed = 1,
    MemoryLow = 2,
    FilesystemError = 3,

    ConfigInvalid = 10,
    ConfigLoadFailed = 11,
    ConfigSaveFailed = 12,

    WifiInitFailed = 20,
    WifiConnectionFailed = 21,
    WifiConnectionLost = 22,
    WifiWrongPassword = 23,
    WifiNoSsid = 24,

    MqttInitFailed = 30,
    MqttConnectionFailed = 31,
    MqttLostConnection = 32,
    MqttSubscriptionFailed = 33,
    MqttPublishFailed = 34,

    SensorInitFailed = 40,
    SensorReadFailed = 41,
    SensorCalibrationFailed = 42,

    RecoveryFailed = 50,
    UpdateFailed = 51,

    UnknownError = 99,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    System,
    Config,
    Connection,
    Messaging,
    Sensor,
    Recovery,
    Unknown,
}

impl ErrorCode {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn category(self) -> ErrorCategory {
        match self.code() {
            0..=9 => ErrorCategory::System,
            10..=19 => ErrorCategory::Config,
            20..=29 => ErrorCategory::Connection,
            30..=39 => ErrorCategory::Messaging,
            40..=49 => ErrorCategory::Sensor,
            50..=59 => ErrorCategory::Recovery,
            _ => ErrorCategory::Unknown,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::BootFailed,
            2 => Self::MemoryLow,
            3 => Self::FilesystemError,
            10 => Self::ConfigInvalid,
            11 => Self::ConfigLoadFailed,
            12 => Self::ConfigSaveFailed,
            20 => Self::WifiInitFailed,
            21 => Self::WifiConnectionFailed,
            22 => Self::WifiConnectionLost,
            23 => Self::WifiWrongPassword,
            24 => Self::WifiNoSsid,
            30 => Self::MqttInitFailed,
            31 => Self::MqttConnectionFailed,
            32 => Self::MqttLostConnection,
            33 => Self::MqttSubscriptionFailed,
            34 => Self::MqttPublishFailed,
            40 => Self::SensorInitFailed,
            41 => Self::SensorReadFailed,
            42 => Self::SensorCalibrationFailed,
            50 => Self::RecoveryFailed,
            51 => Self::UpdateFailed,
            _ => Self::UnknownError,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BootFailed => "BOOT_FAILED",
            Self::MemoryLow => "MEMORY_LOW",
            Self::FilesystemError => "FILESYSTEM_ERROR",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::ConfigLoadFailed => "CONFIG_LOAD_FAILED",
            Self::ConfigSaveFailed => "CONFIG_SAVE_FAILED",
            Self::WifiInitFailed => "WIFI_INIT_FAILED",
            Self::WifiConnectionFailed => "WIFI_CONNECTION_FAILED",
            Self::WifiConnectionLost => "WIFI_CONNECTION_LOST",
            Self::WifiWrongPassword => "WIFI_WRONG_PASSWORD",
            Self::WifiNoSsid => "WIFI_NO_SSID",
            Self::MqttInitFailed => "MQTT_INIT_FAILED",
            Self::MqttConnectionFailed => "MQTT_CONNECTION_FAILED",
            Self::MqttLostConnection => "MQTT_LOST_CONNECTION",
            Self::MqttSubscriptionFailed => "MQTT_SUBSCRIPTION_FAILED",
            Self::MqttPublishFailed => "MQTT_PUBLISH_FAILED",
            Self::SensorInitFailed => "SENSOR_INIT_FAILED",
            Self::SensorReadFailed => "SENSOR_READ_FAILED",
            Self::SensorCalibrationFailed => "SENSOR_CALIBRATION_FAILED",
            Self::RecoveryFailed => "RECOVERY_FAILED",
            Self::UpdateFailed => "UPDATE_FAILED",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_follows_numeric_range() {
        assert_eq!(ErrorCode::MemoryLow.category(), ErrorCategory::System);
        assert_eq!(ErrorCode::ConfigSaveFailed.category(), ErrorCategory::Config);
        assert_eq!(ErrorCode::WifiNoSsid.category(), ErrorCategory::Connection);
        assert_eq!(ErrorCode::MqttPublishFailed.category(), ErrorCategory::Messaging);
        assert_eq!(ErrorCode::SensorReadFailed.category(), ErrorCategory::Sensor);
        assert_eq!(ErrorCode::UpdateFailed.category(), ErrorCategory::Recovery);
        assert_eq!(ErrorCode::UnknownError.category(), ErrorCategory::Unknown);
    }

    #[test]
    fn numeric_codes_round_trip_and_unknowns_collapse() {
        assert_eq!(ErrorCode::from_code(21), ErrorCode::WifiConnectionFailed);
        assert_eq!(ErrorCode::from_code(51).code(), 51);
        assert_eq!(ErrorCode::from_code(77), ErrorCode::UnknownError);
    }
}
