//! The serial transport: one port, its settings and its open session.
//!
//! ```text
//! Closed ──open──> Opening ──> Open ──close──> Closing ──> Closed
//!                                │
//!                                └──I/O fault──> Error ──> Closed
//! ```
//!
//! Settings live on the transport and survive close/open cycles. Each open
//! session owns the acquired handle and its watcher; closing the session
//! joins the watcher first and only then restores and releases the device.

use super::echo::{DiagnosticSink, HexEcho};
use super::error::PortError;
use super::events::{Notifier, PortEvent};
use super::sys::NativeBackend;
use super::traits::{FlowControl, Parity, PortConfig, PortIo, SerialBackend};
use super::watcher::{Watcher, DEFAULT_WATCH_INTERVAL, MIN_WATCH_INTERVAL};
use std::io;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Lifecycle state of a [`SerialTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Closed,
    Opening,
    Open,
    Closing,
    /// A transfer failed; the port is being torn down.
    Error,
}

/// An acquired device and the watcher observing it.
struct Session {
    io: Arc<dyn PortIo>,
    watcher: Watcher,
}

/// Serial port transport over a pluggable [`SerialBackend`].
///
/// Methods take `&mut self`: the caller owns the byte stream and serializes
/// its own reads, writes and lifecycle calls. Only the watcher runs
/// concurrently, and it never touches the stream.
pub struct SerialTransport {
    backend: Box<dyn SerialBackend>,
    port: String,
    config: PortConfig,
    watch_interval: Duration,
    echo: HexEcho,
    notifier: Notifier,
    state: LinkState,
    session: Option<Session>,
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialTransport {
    /// A transport on the native backend for this platform.
    pub fn new() -> Self {
        Self::with_backend(Box::new(NativeBackend))
    }

    pub fn with_backend(backend: Box<dyn SerialBackend>) -> Self {
        Self {
            backend,
            port: String::new(),
            config: PortConfig::default(),
            watch_interval: DEFAULT_WATCH_INTERVAL,
            echo: HexEcho::new(),
            notifier: Notifier::new(),
            state: LinkState::Closed,
            session: None,
        }
    }

    /// Bound on each readiness wait, i.e. how quickly the watcher notices
    /// a close on platforms that cannot interrupt the wait. Takes effect at
    /// the next open. Clamped to [`MIN_WATCH_INTERVAL`].
    pub fn with_watch_interval(mut self, interval: Duration) -> Self {
        self.watch_interval = interval.max(MIN_WATCH_INTERVAL);
        self
    }

    pub fn watch_interval(&self) -> Duration {
        self.watch_interval
    }

    /// Send the debug hex echo somewhere other than stderr.
    pub fn with_diagnostic_sink(mut self, sink: DiagnosticSink) -> Self {
        self.echo.set_sink(sink);
        self
    }

    /// Receive every event raised from now on.
    pub fn subscribe(&self) -> Receiver<PortEvent> {
        self.notifier.subscribe()
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// Select the device for the next open. Ignored while a port is open.
    pub fn set_port(&mut self, port: impl Into<String>) -> String {
        if !self.is_open() {
            self.port = port.into();
        }
        self.port.clone()
    }

    pub fn config(&self) -> PortConfig {
        self.config
    }

    pub fn baud(&self) -> u32 {
        self.config.baud()
    }

    pub fn data_bits(&self) -> u8 {
        self.config.data_bits()
    }

    pub fn parity(&self) -> Parity {
        self.config.parity()
    }

    pub fn flow_control(&self) -> FlowControl {
        self.config.flow_control()
    }

    pub fn debug(&self) -> bool {
        self.echo.enabled()
    }

    /// Replace all line settings, keeping current values for any that are
    /// invalid, and return the settings now in effect.
    pub fn configure(&mut self, config: PortConfig) -> PortConfig {
        self.config.set_baud(config.baud());
        self.config.set_data_bits(config.data_bits());
        self.config.set_parity(config.parity());
        self.config.set_flow_control(config.flow_control());
        self.reapply();
        self.config
    }

    pub fn set_baud(&mut self, baud: u32) -> u32 {
        let effective = self.config.set_baud(baud);
        self.reapply();
        effective
    }

    pub fn set_data_bits(&mut self, bits: u8) -> u8 {
        let effective = self.config.set_data_bits(bits);
        self.reapply();
        effective
    }

    pub fn set_parity(&mut self, parity: Parity) -> Parity {
        let effective = self.config.set_parity(parity);
        self.reapply();
        effective
    }

    pub fn set_parity_code(&mut self, code: u8) -> Parity {
        let effective = self.config.set_parity_code(code);
        self.reapply();
        effective
    }

    pub fn set_flow_control(&mut self, flow: FlowControl) -> FlowControl {
        let effective = self.config.set_flow_control(flow);
        self.reapply();
        effective
    }

    pub fn set_flow_control_code(&mut self, code: u8) -> FlowControl {
        let effective = self.config.set_flow_control_code(code);
        self.reapply();
        effective
    }

    pub fn set_debug(&mut self, debug: bool) -> bool {
        self.echo.set_enabled(debug);
        debug
    }

    /// Push the current settings to the device. No-op while closed.
    fn reapply(&mut self) {
        if let Some(session) = &self.session {
            if let Err(e) = session.io.apply_config(&self.config) {
                warn!(port = %self.port, config = %self.config, error = %e, "cannot apply port settings");
            }
        }
    }

    /// Open the selected port, closing any session already open.
    pub fn open(&mut self) -> Result<(), PortError> {
        self.close()?;

        if self.port.is_empty() {
            return Err(PortError::acquisition(
                "",
                io::Error::new(io::ErrorKind::NotFound, "no port selected"),
            ));
        }

        self.state = LinkState::Opening;
        let result = self.start_session();
        match result {
            Ok(session) => {
                self.session = Some(session);
                self.state = LinkState::Open;
                debug!(port = %self.port, config = %self.config, "port opened");
                self.notifier.emit(PortEvent::Opened);
                Ok(())
            }
            Err(e) => {
                self.state = LinkState::Closed;
                warn!(port = %self.port, error = %e, "cannot open port");
                Err(e)
            }
        }
    }

    fn start_session(&self) -> Result<Session, PortError> {
        let io = self.backend.acquire(&self.port)?;

        let prepared = io
            .apply_config(&self.config)
            .map_err(|e| PortError::configuration(&self.port, e.to_string()))
            .and_then(|()| {
                if let Err(e) = io.flush() {
                    debug!(port = %self.port, error = %e, "cannot flush port queues");
                }
                Watcher::spawn(Arc::clone(&io), self.notifier.clone(), self.watch_interval)
                    .map_err(PortError::WatcherSpawn)
            });

        match prepared {
            Ok(watcher) => Ok(Session { io, watcher }),
            Err(e) => {
                if let Err(release_err) = io.release() {
                    warn!(port = %self.port, error = %release_err, "cannot release port after failed open");
                }
                Err(e)
            }
        }
    }

    /// Close the port. Closing a closed port succeeds and raises no event.
    pub fn close(&mut self) -> Result<(), PortError> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };

        if self.state != LinkState::Error {
            self.state = LinkState::Closing;
        }
        session.watcher.stop();
        let released = session.io.release();

        self.state = LinkState::Closed;
        debug!(port = %self.port, "port closed");
        self.notifier.emit(PortEvent::Closed);

        released.map_err(|e| PortError::configuration(&self.port, format!("restore on close failed: {e}")))
    }

    /// Write some prefix of `data` and return its length. Callers loop for
    /// full delivery.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, PortError> {
        let io = self.live_io()?;
        match io.blocking_write(data) {
            Ok(n) => {
                self.echo.write(&data[..n]);
                Ok(n)
            }
            Err(e) => Err(self.fault("write", e)),
        }
    }

    /// Read up to `max` bytes.
    pub fn read(&mut self, max: usize) -> Result<Vec<u8>, PortError> {
        let mut buf = vec![0u8; max];
        let n = self.read_into(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Read into `buf`, returning the number of bytes stored.
    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<usize, PortError> {
        let io = self.live_io()?;
        match io.blocking_read(buf) {
            Ok(n) => {
                self.echo.read(&buf[..n]);
                if let Some(session) = &self.session {
                    session.watcher.rearm();
                }
                Ok(n)
            }
            Err(e) => Err(self.fault("read", e)),
        }
    }

    fn live_io(&self) -> Result<Arc<dyn PortIo>, PortError> {
        self.session
            .as_ref()
            .map(|session| Arc::clone(&session.io))
            .ok_or(PortError::NotOpen)
    }

    /// Report a failed transfer and force the port closed.
    fn fault(&mut self, op: &str, e: io::Error) -> PortError {
        error!(port = %self.port, error = %e, "serial {op} failed, closing port");
        self.state = LinkState::Error;
        self.notifier.emit(PortEvent::Error);
        if let Err(close_err) = self.close() {
            warn!(port = %self.port, error = %close_err, "close after fault failed");
        }
        PortError::IoFault(e)
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(port = %self.port, error = %e, "close on drop failed");
        }
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("port", &self.port)
            .field("config", &self.config)
            .field("state", &self.state)
            .field("debug", &self.echo.enabled())
            .finish()
    }
}
