//! Core types and traits for the serial transport.
//!
//! [`SerialBackend`] and [`PortIo`] form the capability interface every
//! platform implements: acquiring a device, applying attributes, blocking
//! byte transfer, and waiting for read readiness. The transport itself only
//! talks to these traits, so it runs unchanged against the native backends
//! and the in-memory mock.

use super::error::PortError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Baud rates a port can be configured with.
pub const SUPPORTED_BAUD_RATES: [u32; 10] = [
    300, 600, 1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200,
];

pub const DEFAULT_BAUD_RATE: u32 = 19200;
pub const DEFAULT_DATA_BITS: u8 = 8;

/// Parity checking modes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl TryFrom<u8> for Parity {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Parity::None),
            1 => Ok(Parity::Odd),
            2 => Ok(Parity::Even),
            other => Err(other),
        }
    }
}

impl FromStr for Parity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "n" => Ok(Parity::None),
            "odd" | "o" => Ok(Parity::Odd),
            "even" | "e" => Ok(Parity::Even),
            other => Err(format!("unknown parity '{other}' (expected none, odd or even)")),
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Parity::None => "none",
            Parity::Odd => "odd",
            Parity::Even => "even",
        })
    }
}

/// Flow control modes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    #[default]
    None,
    /// RTS/CTS handshaking.
    Hardware,
    /// XON/XOFF handshaking.
    Software,
}

impl TryFrom<u8> for FlowControl {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(FlowControl::None),
            1 => Ok(FlowControl::Hardware),
            2 => Ok(FlowControl::Software),
            other => Err(other),
        }
    }
}

impl FromStr for FlowControl {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(FlowControl::None),
            "hardware" | "rtscts" | "rts-cts" => Ok(FlowControl::Hardware),
            "software" | "xonxoff" | "xon-xoff" => Ok(FlowControl::Software),
            other => Err(format!(
                "unknown flow control '{other}' (expected none, hardware or software)"
            )),
        }
    }
}

impl fmt::Display for FlowControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FlowControl::None => "none",
            FlowControl::Hardware => "hardware",
            FlowControl::Software => "software",
        })
    }
}

/// Line settings for a serial port.
///
/// Setters never fail. A value outside the supported range is ignored and
/// the previous value kept; every setter returns the value now in effect, so
/// callers compare the return value to learn whether the change took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortConfig {
    baud: u32,
    data_bits: u8,
    parity: Parity,
    flow_control: FlowControl,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            baud: DEFAULT_BAUD_RATE,
            data_bits: DEFAULT_DATA_BITS,
            parity: Parity::None,
            flow_control: FlowControl::None,
        }
    }
}

impl PortConfig {
    pub fn baud(&self) -> u32 {
        self.baud
    }

    pub fn data_bits(&self) -> u8 {
        self.data_bits
    }

    pub fn parity(&self) -> Parity {
        self.parity
    }

    pub fn flow_control(&self) -> FlowControl {
        self.flow_control
    }

    /// Set the baud rate if it is one of [`SUPPORTED_BAUD_RATES`].
    pub fn set_baud(&mut self, baud: u32) -> u32 {
        if SUPPORTED_BAUD_RATES.contains(&baud) {
            self.baud = baud;
        }
        self.baud
    }

    /// Set the character size if it is within 5..=8.
    pub fn set_data_bits(&mut self, bits: u8) -> u8 {
        if (5..=8).contains(&bits) {
            self.data_bits = bits;
        }
        self.data_bits
    }

    pub fn set_parity(&mut self, parity: Parity) -> Parity {
        self.parity = parity;
        self.parity
    }

    /// Set parity from its numeric code (0 none, 1 odd, 2 even).
    pub fn set_parity_code(&mut self, code: u8) -> Parity {
        if let Ok(parity) = Parity::try_from(code) {
            self.parity = parity;
        }
        self.parity
    }

    pub fn set_flow_control(&mut self, flow: FlowControl) -> FlowControl {
        self.flow_control = flow;
        self.flow_control
    }

    /// Set flow control from its numeric code (0 none, 1 hardware, 2 software).
    pub fn set_flow_control_code(&mut self, code: u8) -> FlowControl {
        if let Ok(flow) = FlowControl::try_from(code) {
            self.flow_control = flow;
        }
        self.flow_control
    }

    /// Builder-style variant of the setters, for constructing configs inline.
    pub fn with(mut self, baud: u32, data_bits: u8, parity: Parity, flow: FlowControl) -> Self {
        self.set_baud(baud);
        self.set_data_bits(data_bits);
        self.set_parity(parity);
        self.set_flow_control(flow);
        self
    }
}

impl fmt::Display for PortConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        };
        write!(
            f,
            "{} {}{}1 flow={}",
            self.baud, self.data_bits, parity, self.flow_control
        )
    }
}

/// Entry point of a platform backend: turns a port name into a live handle.
#[cfg_attr(test, mockall::automock)]
pub trait SerialBackend: Send + Sync {
    /// Open the device and capture its current attributes so that
    /// [`PortIo::release`] can restore them.
    fn acquire(&self, port: &str) -> Result<Arc<dyn PortIo>, PortError>;
}

/// An acquired serial device.
///
/// Shared between the transport (which reads, writes and releases) and the
/// watcher thread (which only waits for readiness), hence `&self` methods.
pub trait PortIo: Send + Sync {
    /// The port name this handle was acquired from.
    fn name(&self) -> &str;

    /// Push line settings to the device.
    fn apply_config(&self, config: &PortConfig) -> io::Result<()>;

    /// Discard anything pending in the input and output queues.
    fn flush(&self) -> io::Result<()>;

    /// Read at least one byte, or return 0 if the platform's bounded wait ran out.
    fn blocking_read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write some prefix of `data` and return how many bytes went out.
    fn blocking_write(&self, data: &[u8]) -> io::Result<usize>;

    /// Block until the read side has data or `timeout` elapses.
    ///
    /// Returns `Ok(true)` on readiness and `Ok(false)` on timeout.
    fn wait_readable(&self, timeout: Duration) -> io::Result<bool>;

    /// Interrupt a pending [`PortIo::wait_readable`], if the platform can.
    fn wake(&self) {}

    /// Whether each `Ok(true)` from [`PortIo::wait_readable`] is a distinct
    /// event. Level-triggered handles keep reporting unread input, so the
    /// watcher holds further notifications until the next read.
    fn edge_triggered(&self) -> bool {
        false
    }

    /// Whether the handle still refers to an open device.
    fn is_valid(&self) -> bool;

    /// Restore the attributes captured at acquisition and close the device.
    ///
    /// After the first call the handle is invalid; later calls are no-ops.
    fn release(&self) -> io::Result<()>;
}
