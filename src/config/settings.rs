//! Application settings

use crate::core::codec::{DisplayMode, RgbRemainder, TextEncoding};
use crate::core::logger::{TimestampMode, MAX_ENTRIES};
use crate::core::session::SessionConfig;
use crate::core::transport::{SerialFlowControl, SerialOptions, SerialParity};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const CONFIG_FILE: &str = "config.toml";

/// Settings errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No platform config directory
    #[error("Could not determine config directory")]
    NoConfigDir,

    /// File access failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed TOML
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Serialization failed
    #[error("Could not write config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Serial line defaults
    pub serial: SerialConfig,
    /// Receive pipeline settings
    pub display: DisplayConfig,
    /// Diagnostic logging
    pub logging: LoggingConfig,
    /// Demo producer
    pub demo: DemoConfig,
}

impl AppConfig {
    /// Load config from the platform config directory, or defaults
    pub fn load() -> Result<Self, ConfigError> {
        let dir = super::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Self::load_from(&dir.join(CONFIG_FILE))
    }

    /// Load config from `path`, or defaults when it does not exist
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Save config to the platform config directory
    pub fn save(&self) -> Result<(), ConfigError> {
        let dir = super::config_dir().ok_or(ConfigError::NoConfigDir)?;
        std::fs::create_dir_all(&dir)?;
        self.save_to(&dir.join(CONFIG_FILE))
    }

    /// Save to an explicit path, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Pipeline settings for a new session
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            display_mode: self.display.mode,
            encoding: self.display.encoding,
            timestamp_mode: self.display.timestamps,
            charting: self.display.charting,
            rgb_remainder: self.display.rgb_remainder,
            max_log_entries: self.display.max_log_entries,
        }
    }
}

/// Serial line defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Last used port
    pub port: Option<String>,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits
    pub data_bits: u8,
    /// Stop bits
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Flow control
    pub flow_control: SerialFlowControl,
    /// Append `\n` to typed text
    pub append_newline: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115200,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: SerialFlowControl::None,
            append_newline: true,
        }
    }
}

impl SerialConfig {
    /// Port options for the transport
    pub fn options(&self) -> SerialOptions {
        SerialOptions::new(self.baud_rate)
            .data_bits(self.data_bits)
            .stop_bits(self.stop_bits)
            .parity(self.parity)
            .flow_control(self.flow_control)
    }
}

/// Receive pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Display mode
    pub mode: DisplayMode,
    /// Text encoding
    pub encoding: TextEncoding,
    /// Timestamp labels
    pub timestamps: TimestampMode,
    /// Extract `key:value` telemetry
    pub charting: bool,
    /// RGB remainder policy
    pub rgb_remainder: RgbRemainder,
    /// Log entry cap
    pub max_log_entries: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            mode: DisplayMode::Text,
            encoding: TextEncoding::Utf8,
            timestamps: TimestampMode::Absolute,
            charting: false,
            rgb_remainder: RgbRemainder::Truncate,
            max_log_entries: MAX_ENTRIES,
        }
    }
}

/// Diagnostic logging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// Write a daily rolling log file
    pub file: bool,
    /// Log file directory
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: false,
            directory: super::log_dir(),
        }
    }
}

/// Demo producer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Tick period in milliseconds
    pub tick_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self { tick_ms: 1000 }
    }
}
