//! Background readiness watcher.
//!
//! One thread per open session blocks on the handle's readiness primitive
//! with a bounded timeout and raises [`PortEvent::DataReady`] when the read
//! side has bytes. It never reads; the collaborator does that through the
//! transport. The thread is joined by [`Watcher::stop`], so it cannot outlive
//! the handle it observes.
//!
//! Edge-triggered handles raise one `DataReady` per readiness event. The
//! native primitives are level-triggered, so for those the watcher holds off
//! after each `DataReady` until the transport has read; otherwise every poll
//! would re-report the same unread bytes.

use super::events::{Notifier, PortEvent};
use super::traits::PortIo;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Default bound on a single readiness wait.
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(1);

/// Shortest readiness wait; a zero wait would turn the watcher into a busy loop.
pub const MIN_WATCH_INTERVAL: Duration = Duration::from_millis(1);

/// Armed while the watcher may raise the next `DataReady`.
#[derive(Debug)]
struct ReadGate {
    armed: Mutex<bool>,
    changed: Condvar,
}

impl ReadGate {
    fn new() -> Self {
        Self {
            armed: Mutex::new(true),
            changed: Condvar::new(),
        }
    }

    fn arm(&self) {
        *self.armed.lock() = true;
        self.changed.notify_all();
    }

    fn disarm(&self) {
        *self.armed.lock() = false;
    }

    /// Wake a watcher parked in `wait_armed`.
    fn interrupt(&self) {
        let _armed = self.armed.lock();
        self.changed.notify_all();
    }

    /// Block until armed, `running` clears, or `timeout` passes.
    fn wait_armed(&self, running: &AtomicBool, timeout: Duration) -> bool {
        let mut armed = self.armed.lock();
        while !*armed && running.load(Ordering::Acquire) {
            if self.changed.wait_for(&mut armed, timeout).timed_out() {
                break;
            }
        }
        *armed && running.load(Ordering::Acquire)
    }
}

pub(crate) struct Watcher {
    running: Arc<AtomicBool>,
    gate: Arc<ReadGate>,
    io: Arc<dyn PortIo>,
    thread: Option<JoinHandle<()>>,
}

impl Watcher {
    pub(crate) fn spawn(
        io: Arc<dyn PortIo>,
        notifier: Notifier,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let interval = interval.max(MIN_WATCH_INTERVAL);
        let running = Arc::new(AtomicBool::new(true));
        let gate = Arc::new(ReadGate::new());
        let thread = thread::Builder::new()
            .name(format!("serial-watch:{}", io.name()))
            .spawn({
                let running = Arc::clone(&running);
                let gate = Arc::clone(&gate);
                let io = Arc::clone(&io);
                move || watch(&*io, &running, &gate, &notifier, interval)
            })?;

        Ok(Self {
            running,
            gate,
            io,
            thread: Some(thread),
        })
    }

    /// Allow the next `DataReady`; called after every read.
    pub(crate) fn rearm(&self) {
        self.gate.arm();
    }

    /// Clear the running flag, interrupt the pending wait and join the thread.
    pub(crate) fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.gate.interrupt();
        self.io.wake();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(port = self.io.name(), "watcher thread panicked");
            }
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn watch(
    io: &dyn PortIo,
    running: &AtomicBool,
    gate: &ReadGate,
    notifier: &Notifier,
    interval: Duration,
) {
    debug!(port = io.name(), "watcher started");

    let gated = !io.edge_triggered();

    while running.load(Ordering::Acquire) && io.is_valid() {
        if gated && !gate.wait_armed(running, interval) {
            continue;
        }
        match io.wait_readable(interval) {
            Ok(true) => {
                // close() may have begun while we were blocked.
                if !running.load(Ordering::Acquire) {
                    break;
                }
                if gated {
                    gate.disarm();
                }
                notifier.emit(PortEvent::DataReady);
            }
            Ok(false) => {}
            Err(e) => {
                if running.load(Ordering::Acquire) {
                    warn!(port = io.name(), error = %e, "readiness wait failed, watcher exiting");
                }
                break;
            }
        }
    }

    debug!(port = io.name(), "watcher stopped");
}
