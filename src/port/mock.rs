//! In-memory serial backend for testing.
//!
//! [`MockBackend`] stands in for the platform backends without any hardware.
//! It models a single device with its own line settings, an inbound byte
//! queue and a readiness counter, and records every call the transport makes
//! so tests can assert on acquisition, attribute application and restoration.

use super::error::PortError;
use super::traits::{PortConfig, PortIo, SerialBackend};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long a mock read waits for bytes before returning 0.
const MOCK_READ_WAIT: Duration = Duration::from_millis(50);

/// Simulated device plus a log of everything done to it.
#[derive(Debug)]
struct MockDevice {
    /// Line settings currently on the device.
    attributes: PortConfig,
    /// Settings captured by the most recent acquisition.
    snapshot: Option<PortConfig>,
    applied: Vec<PortConfig>,
    restored: Vec<PortConfig>,
    open: bool,
    acquire_count: usize,
    release_count: usize,
    flush_count: usize,
    read_queue: VecDeque<u8>,
    write_log: Vec<Vec<u8>>,
    /// Outstanding readiness events not yet observed by a waiter.
    readiness: usize,
    wake_pending: bool,
    fail_acquire: Option<io::ErrorKind>,
    fail_configure: bool,
    fail_next_read: Option<io::ErrorKind>,
    fail_next_write: Option<io::ErrorKind>,
    write_limit: Option<usize>,
}

impl MockDevice {
    fn new(attributes: PortConfig) -> Self {
        Self {
            attributes,
            snapshot: None,
            applied: Vec::new(),
            restored: Vec::new(),
            open: false,
            acquire_count: 0,
            release_count: 0,
            flush_count: 0,
            read_queue: VecDeque::new(),
            write_log: Vec::new(),
            readiness: 0,
            wake_pending: false,
            fail_acquire: None,
            fail_configure: false,
            fail_next_read: None,
            fail_next_write: None,
            write_limit: None,
        }
    }
}

#[derive(Debug)]
struct Shared {
    device: Mutex<MockDevice>,
    changed: Condvar,
}

/// Mock backend for testing.
///
/// Clones share the same simulated device, so a test keeps one clone for
/// inspection and hands the other to the transport.
///
/// # Example
/// ```
/// use serial_link::port::{MockBackend, PortEvent, SerialTransport};
///
/// let mock = MockBackend::new();
/// let mut transport = SerialTransport::with_backend(Box::new(mock.clone()));
/// let events = transport.subscribe();
///
/// transport.set_port("MOCK0");
/// transport.open().unwrap();
/// assert_eq!(events.recv().unwrap(), PortEvent::Opened);
///
/// mock.receive(b"OK\r\n");
/// assert_eq!(events.recv().unwrap(), PortEvent::DataReady);
/// assert_eq!(transport.read(64).unwrap(), b"OK\r\n");
///
/// transport.write(b"AT\r").unwrap();
/// assert_eq!(mock.write_log(), vec![b"AT\r".to_vec()]);
/// ```
#[derive(Debug, Clone)]
pub struct MockBackend {
    shared: Arc<Shared>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// A device that starts out at 9600 8N1, no flow control.
    pub fn new() -> Self {
        Self::with_device_config(PortConfig::default().with(
            9600,
            8,
            Default::default(),
            Default::default(),
        ))
    }

    /// A device whose pre-open settings are `attributes`.
    pub fn with_device_config(attributes: PortConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                device: Mutex::new(MockDevice::new(attributes)),
                changed: Condvar::new(),
            }),
        }
    }

    /// Queue inbound bytes without signalling readiness.
    pub fn enqueue_read(&self, data: &[u8]) {
        self.shared.device.lock().read_queue.extend(data);
        self.shared.changed.notify_all();
    }

    /// Signal one readiness event to the watcher.
    pub fn inject_readiness(&self) {
        self.shared.device.lock().readiness += 1;
        self.shared.changed.notify_all();
    }

    /// Queue inbound bytes and signal one readiness event.
    pub fn receive(&self, data: &[u8]) {
        {
            let mut device = self.shared.device.lock();
            device.read_queue.extend(data);
            device.readiness += 1;
        }
        self.shared.changed.notify_all();
    }

    /// Make the next acquisition fail with `kind`.
    pub fn fail_acquire(&self, kind: io::ErrorKind) {
        self.shared.device.lock().fail_acquire = Some(kind);
    }

    /// Make every attribute application fail while set.
    pub fn fail_configure(&self, fail: bool) {
        self.shared.device.lock().fail_configure = fail;
    }

    pub fn fail_next_read(&self, kind: io::ErrorKind) {
        self.shared.device.lock().fail_next_read = Some(kind);
    }

    pub fn fail_next_write(&self, kind: io::ErrorKind) {
        self.shared.device.lock().fail_next_write = Some(kind);
    }

    /// Cap how many bytes a single write accepts, to simulate partial writes.
    pub fn limit_writes(&self, limit: Option<usize>) {
        self.shared.device.lock().write_limit = limit;
    }

    /// Get a copy of all data written to the port.
    pub fn write_log(&self) -> Vec<Vec<u8>> {
        self.shared.device.lock().write_log.clone()
    }

    /// Every config pushed to the device, in order.
    pub fn applied_configs(&self) -> Vec<PortConfig> {
        self.shared.device.lock().applied.clone()
    }

    /// Every snapshot written back on release, in order.
    pub fn restored_configs(&self) -> Vec<PortConfig> {
        self.shared.device.lock().restored.clone()
    }

    /// Line settings the device currently holds.
    pub fn device_config(&self) -> PortConfig {
        self.shared.device.lock().attributes
    }

    pub fn is_device_open(&self) -> bool {
        self.shared.device.lock().open
    }

    pub fn acquire_count(&self) -> usize {
        self.shared.device.lock().acquire_count
    }

    pub fn release_count(&self) -> usize {
        self.shared.device.lock().release_count
    }

    pub fn flush_count(&self) -> usize {
        self.shared.device.lock().flush_count
    }

    /// Get the number of bytes available to read.
    pub fn available_bytes(&self) -> usize {
        self.shared.device.lock().read_queue.len()
    }

    /// Readiness events injected but not yet observed.
    pub fn pending_readiness(&self) -> usize {
        self.shared.device.lock().readiness
    }
}

impl SerialBackend for MockBackend {
    fn acquire(&self, port: &str) -> Result<Arc<dyn PortIo>, PortError> {
        let mut device = self.shared.device.lock();

        if let Some(kind) = device.fail_acquire.take() {
            return Err(PortError::acquisition(
                port,
                io::Error::new(kind, "simulated acquisition failure"),
            ));
        }
        if device.open {
            return Err(PortError::acquisition(
                port,
                io::Error::new(io::ErrorKind::ResourceBusy, "device already in use"),
            ));
        }

        device.open = true;
        device.acquire_count += 1;
        device.snapshot = Some(device.attributes);
        device.wake_pending = false;

        Ok(Arc::new(MockPort {
            name: port.to_string(),
            valid: AtomicBool::new(true),
            shared: Arc::clone(&self.shared),
        }))
    }
}

/// Handle returned by [`MockBackend::acquire`].
#[derive(Debug)]
struct MockPort {
    name: String,
    valid: AtomicBool,
    shared: Arc<Shared>,
}

impl MockPort {
    fn ensure_valid(&self) -> io::Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::NotConnected, "handle released"))
        }
    }
}

impl PortIo for MockPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply_config(&self, config: &PortConfig) -> io::Result<()> {
        self.ensure_valid()?;
        let mut device = self.shared.device.lock();
        if device.fail_configure {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "simulated attribute rejection",
            ));
        }
        device.attributes = *config;
        device.applied.push(*config);
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        self.ensure_valid()?;
        let mut device = self.shared.device.lock();
        device.read_queue.clear();
        device.flush_count += 1;
        Ok(())
    }

    fn blocking_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_valid()?;
        let deadline = Instant::now() + MOCK_READ_WAIT;
        let mut device = self.shared.device.lock();

        if let Some(kind) = device.fail_next_read.take() {
            return Err(io::Error::new(kind, "simulated read fault"));
        }

        while device.read_queue.is_empty() && self.is_valid() {
            if self.shared.changed.wait_until(&mut device, deadline).timed_out() {
                break;
            }
        }

        let n = buf.len().min(device.read_queue.len());
        for (slot, byte) in buf.iter_mut().zip(device.read_queue.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn blocking_write(&self, data: &[u8]) -> io::Result<usize> {
        self.ensure_valid()?;
        let mut device = self.shared.device.lock();

        if let Some(kind) = device.fail_next_write.take() {
            return Err(io::Error::new(kind, "simulated write fault"));
        }

        let n = device.write_limit.map_or(data.len(), |limit| limit.min(data.len()));
        device.write_log.push(data[..n].to_vec());
        Ok(n)
    }

    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut device = self.shared.device.lock();

        loop {
            if !self.is_valid() {
                return Ok(false);
            }
            if device.wake_pending {
                device.wake_pending = false;
                return Ok(false);
            }
            if device.readiness > 0 {
                device.readiness -= 1;
                return Ok(true);
            }
            if self.shared.changed.wait_until(&mut device, deadline).timed_out() {
                return Ok(false);
            }
        }
    }

    fn wake(&self) {
        self.shared.device.lock().wake_pending = true;
        self.shared.changed.notify_all();
    }

    /// Each readiness token is one event.
    fn edge_triggered(&self) -> bool {
        true
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    fn release(&self) -> io::Result<()> {
        if !self.valid.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        {
            let mut device = self.shared.device.lock();
            if let Some(snapshot) = device.snapshot.take() {
                device.attributes = snapshot;
                device.restored.push(snapshot);
            }
            device.read_queue.clear();
            device.open = false;
            device.release_count += 1;
        }
        self.shared.changed.notify_all();
        Ok(())
    }
}
