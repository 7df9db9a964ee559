//! Configuration for the `serial-link` front end.
//!
//! Settings come from a TOML file with environment variable overrides.
//!
//! # Resolution
//!
//! 1. `SERIAL_LINK_CONFIG` environment variable (explicit path)
//! 2. `./serial-link.toml`
//! 3. `config.toml` in the platform config directory
//!    (`~/.config/serial-link` on Linux, `%APPDATA%\serial-link\config` on Windows)
//! 4. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! - `SERIAL_LINK_SERIAL_PORT=/dev/ttyUSB0`
//! - `SERIAL_LINK_SERIAL_BAUD=115200`
//! - `SERIAL_LINK_SERIAL_DATA_BITS=7`
//! - `SERIAL_LINK_SERIAL_PARITY=even`
//! - `SERIAL_LINK_SERIAL_FLOW_CONTROL=hardware`
//! - `SERIAL_LINK_SERIAL_DEBUG=true`
//! - `SERIAL_LINK_LOGGING_LEVEL=debug`
//!
//! # Example file
//!
//! ```toml
//! [serial]
//! port = "xbee"
//! baud = 9600
//! parity = "none"
//! flow_control = "hardware"
//!
//! [serial.port_aliases]
//! xbee = "/dev/ttyUSB0"
//!
//! [logging]
//! level = "debug"
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{default_config_path, resolve_config_path, ConfigLoader};
pub use schema::{Config, EnumerationConfig, LogFormat, LoggingConfig, SerialConfig};
