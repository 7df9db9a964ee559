//! Port event notification.
//!
//! The transport pushes a [`PortEvent`] to every subscriber through its own
//! `std::sync::mpsc` channel. Subscribers decide for themselves which thread
//! drains the receiver; a dropped receiver is pruned on the next emit.

use parking_lot::Mutex;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

/// An event raised by a [`crate::port::SerialTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortEvent {
    /// The port was opened and the watcher is running.
    Opened,
    /// The port was closed and its prior settings restored.
    Closed,
    /// A read or write failed; a `Closed` event follows.
    Error,
    /// Inbound bytes are waiting to be read.
    DataReady,
}

/// Fan-out of port events to any number of subscribers.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    subscribers: Arc<Mutex<Vec<Sender<PortEvent>>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber. Only events emitted after this call are seen.
    pub fn subscribe(&self) -> Receiver<PortEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn emit(&self, event: PortEvent) {
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(event).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
