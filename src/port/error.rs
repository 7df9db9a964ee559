//! Port-specific error types.
//!
//! Only [`PortError::IoFault`] carries side effects: the transport raises the
//! error notification and forces the port closed before returning it. Every
//! other variant is handed back to the caller as-is.

use thiserror::Error;

/// Errors that can occur during serial port operations.
#[derive(Debug, Error)]
pub enum PortError {
    /// Attempted to use a port that's not open.
    #[error("Port is not open")]
    NotOpen,

    /// The device could not be acquired (missing, busy, or permission denied).
    #[error("Cannot open serial port {port}: {source}")]
    AcquisitionFailed {
        port: String,
        #[source]
        source: std::io::Error,
    },

    /// The device was acquired but rejected the requested attributes.
    #[error("Cannot configure serial port {port}: {reason}")]
    ConfigurationFailed { port: String, reason: String },

    /// A read or write failed against an open device.
    #[error("I/O error on open port: {0}")]
    IoFault(#[source] std::io::Error),

    /// The background watcher thread could not be started.
    #[error("Cannot start port watcher: {0}")]
    WatcherSpawn(#[source] std::io::Error),
}

impl PortError {
    /// Create an AcquisitionFailed error from a port name and the OS error.
    pub fn acquisition(port: impl Into<String>, source: std::io::Error) -> Self {
        Self::AcquisitionFailed {
            port: port.into(),
            source,
        }
    }

    /// Create a ConfigurationFailed error from a port name and a message.
    pub fn configuration(port: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigurationFailed {
            port: port.into(),
            reason: reason.into(),
        }
    }

    /// The `std::io::ErrorKind` behind this error, when there is one.
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            Self::AcquisitionFailed { source, .. } => Some(source.kind()),
            Self::IoFault(e) | Self::WatcherSpawn(e) => Some(e.kind()),
            Self::NotOpen | Self::ConfigurationFailed { .. } => None,
        }
    }
}
