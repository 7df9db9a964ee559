//! Configuration schema definitions.
//!
//! This module defines the structure of the configuration file using serde.
//! All configuration sections are defined here with appropriate defaults.

use super::error::{ConfigError, ConfigResult};
use crate::port::enumerate::{
    DEFAULT_BY_ID_DIR, DEFAULT_DEVICE_DIR, LEGACY_PREFIXES, USB_PREFIXES,
};
use crate::port::{
    Enumerator, FlowControl, Parity, PortConfig, DEFAULT_BAUD_RATE, DEFAULT_DATA_BITS,
    SUPPORTED_BAUD_RATES,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial port configuration
    pub serial: SerialConfig,
    /// Port discovery configuration
    pub enumeration: EnumerationConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Reject values the transport would silently ignore.
    pub fn validate(&self) -> ConfigResult<()> {
        let serial = &self.serial;
        if !SUPPORTED_BAUD_RATES.contains(&serial.baud) {
            return Err(ConfigError::validation(
                "serial.baud",
                format!("{} is not one of {:?}", serial.baud, SUPPORTED_BAUD_RATES),
            ));
        }
        if !(5..=8).contains(&serial.data_bits) {
            return Err(ConfigError::validation(
                "serial.data_bits",
                format!("{} is outside 5..=8", serial.data_bits),
            ));
        }
        if serial.watch_interval_ms == 0 {
            return Err(ConfigError::validation(
                "serial.watch_interval_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Serial port configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port opened when none is given on the command line
    pub port: Option<String>,
    pub baud: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub flow_control: FlowControl,
    /// Echo every transfer as hex on stderr
    pub debug: bool,
    /// Bound on each readiness wait of the watcher, in milliseconds
    pub watch_interval_ms: u64,
    /// Port aliases for convenience
    #[serde(default)]
    pub port_aliases: HashMap<String, String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud: DEFAULT_BAUD_RATE,
            data_bits: DEFAULT_DATA_BITS,
            parity: Parity::None,
            flow_control: FlowControl::None,
            debug: false,
            watch_interval_ms: 1000,
            port_aliases: HashMap::new(),
        }
    }
}

impl SerialConfig {
    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms)
    }

    /// Resolve a port name through aliases
    pub fn resolve_port(&self, name: &str) -> String {
        self.port_aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// Line settings described by this section.
    pub fn port_config(&self) -> PortConfig {
        PortConfig::default().with(self.baud, self.data_bits, self.parity, self.flow_control)
    }
}

/// Port discovery configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnumerationConfig {
    /// Directory scanned for tty nodes
    pub device_dir: PathBuf,
    /// Directory of stable symlinks to USB serial devices
    pub by_id_dir: PathBuf,
    /// Node-name prefixes listed without probing
    pub usb_prefixes: Vec<String>,
    /// Node-name prefixes listed only when the driver reports a UART
    pub legacy_prefixes: Vec<String>,
}

impl Default for EnumerationConfig {
    fn default() -> Self {
        Self {
            device_dir: PathBuf::from(DEFAULT_DEVICE_DIR),
            by_id_dir: PathBuf::from(DEFAULT_BY_ID_DIR),
            usb_prefixes: USB_PREFIXES.iter().map(|p| p.to_string()).collect(),
            legacy_prefixes: LEGACY_PREFIXES.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl EnumerationConfig {
    pub fn enumerator(&self) -> Enumerator {
        Enumerator::new(&self.device_dir, &self.by_id_dir)
            .with_prefixes(&self.usb_prefixes, &self.legacy_prefixes)
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
    /// Log format: "pretty" or "compact"
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line format with colors
    Pretty,
    /// Single-line format
    #[default]
    Compact,
}
