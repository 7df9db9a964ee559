//! Utility functions for hardware testing.

use serial_link::port::{PortConfig, PortEvent, SerialTransport};
use std::env;
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

/// Test port configuration from environment.
pub struct TestPortConfig {
    pub port_name: String,
    pub baud: u32,
    /// TX and RX are wired together.
    pub loopback: bool,
}

impl TestPortConfig {
    /// Read `SERIAL_LINK_TEST_PORT`, `SERIAL_LINK_TEST_BAUD` and
    /// `SERIAL_LINK_TEST_LOOPBACK`. `None` when no port is given.
    pub fn from_env() -> Option<Self> {
        let port_name = env::var("SERIAL_LINK_TEST_PORT").ok()?;
        let baud = env::var("SERIAL_LINK_TEST_BAUD")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(9600);
        let loopback = env::var("SERIAL_LINK_TEST_LOOPBACK").ok().as_deref() == Some("1");

        Some(Self {
            port_name,
            baud,
            loopback,
        })
    }

    pub fn port_config(&self) -> PortConfig {
        let mut config = PortConfig::default();
        config.set_baud(self.baud);
        config
    }

    /// A closed transport on the native backend for this port.
    pub fn transport(&self) -> SerialTransport {
        let mut transport = SerialTransport::new().with_watch_interval(Duration::from_millis(100));
        transport.set_port(self.port_name.as_str());
        transport.configure(self.port_config());
        transport
    }
}

/// Skip test if hardware is not available.
pub fn skip_without_hardware() -> Option<TestPortConfig> {
    let config = TestPortConfig::from_env();
    if config.is_none() {
        println!("Skipping hardware test: SERIAL_LINK_TEST_PORT not set");
    }
    config
}

/// Collect bytes until `want` have arrived or `timeout` passes.
pub fn read_until(
    transport: &mut SerialTransport,
    events: &Receiver<PortEvent>,
    want: usize,
    timeout: Duration,
) -> Vec<u8> {
    let deadline = Instant::now() + timeout;
    let mut got = Vec::new();

    while got.len() < want {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            break;
        }
        match events.recv_timeout(left) {
            Ok(PortEvent::DataReady) => {
                got.extend(transport.read(want - got.len()).expect("read failed"));
            }
            Ok(PortEvent::Error) | Ok(PortEvent::Closed) => break,
            Ok(PortEvent::Opened) => {}
            Err(_) => break,
        }
    }
    got
}
