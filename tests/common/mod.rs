//! Shared test utilities for serial-link tests.
//!
//! - an in-memory diagnostic sink for the hex echo
//! - a transport wired to a [`MockBackend`] with a short watch interval
//! - event collection with timeouts, so a missing event fails instead of hanging

#![allow(dead_code)]

use parking_lot::Mutex;
use serial_link::port::{DiagnosticSink, MockBackend, PortEvent, SerialTransport};
use std::io::{self, Write};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

/// Port name used by mock-backed tests.
pub const MOCK_PORT: &str = "/dev/ttyMOCK0";

/// Upper bound on waiting for an event that must arrive.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// How long to wait before concluding an event will not arrive.
pub const QUIET_PERIOD: Duration = Duration::from_millis(250);

/// Watch interval for mock-backed transports.
pub const TEST_WATCH_INTERVAL: Duration = Duration::from_millis(20);

/// Writer that keeps everything written to it.
#[derive(Clone, Default)]
pub struct CapturedOutput {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl CapturedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sink(&self) -> DiagnosticSink {
        Arc::new(Mutex::new(self.clone()))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock()).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.text().lines().map(str::to_string).collect()
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A closed transport on `mock`, with [`MOCK_PORT`] selected.
pub fn mock_transport(mock: &MockBackend) -> SerialTransport {
    let mut transport = SerialTransport::with_backend(Box::new(mock.clone()))
        .with_watch_interval(TEST_WATCH_INTERVAL);
    transport.set_port(MOCK_PORT);
    transport
}

/// Next event, failing the test if none arrives in time.
pub fn expect_event(events: &Receiver<PortEvent>) -> PortEvent {
    events
        .recv_timeout(EVENT_TIMEOUT)
        .expect("expected a port event")
}

/// Assert no event arrives during [`QUIET_PERIOD`].
pub fn expect_quiet(events: &Receiver<PortEvent>) {
    match events.recv_timeout(QUIET_PERIOD) {
        Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
        Ok(event) => panic!("unexpected event {event:?}"),
    }
}

/// Everything already queued, without waiting.
pub fn drain(events: &Receiver<PortEvent>) -> Vec<PortEvent> {
    events.try_iter().collect()
}
