//! Cross-platform serial port discovery and transport.
//!
//! # Modules
//!
//! - `port`: enumeration, the [`SerialTransport`](port::SerialTransport), its
//!   native backends and an in-memory backend for tests
//! - `config`: TOML configuration with environment overrides
//! - `logging`: `tracing` subscriber setup for the binary
//!
//! A transport is configured while closed, opened, and then driven by the
//! caller: [`PortEvent::DataReady`](port::PortEvent) says bytes are waiting,
//! `read` collects them and `write` sends. See [`port::MockBackend`] for a
//! runnable example without hardware.

pub mod config;
pub mod logging;
pub mod port;

pub use config::{Config, ConfigError, ConfigLoader};
pub use port::{enumerate, PortConfig, PortError, PortEvent, SerialTransport};
