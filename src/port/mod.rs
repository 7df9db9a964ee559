//! Serial port discovery and transport.
//!
//! [`SerialTransport`] talks to hardware through the [`SerialBackend`] /
//! [`PortIo`] capability traits, implemented natively for POSIX and Windows
//! in [`sys`] and in memory by [`MockBackend`] for tests.

pub mod echo;
pub mod enumerate;
pub mod error;
pub mod events;
pub mod mock;
pub mod sys;
pub mod traits;
pub mod transport;
mod watcher;

pub use echo::{format_hex, DiagnosticSink};
pub use enumerate::{enumerate, natural_cmp, sort_and_dedup, Enumerator};
pub use error::PortError;
pub use events::{Notifier, PortEvent};
pub use mock::MockBackend;
pub use sys::NativeBackend;
pub use traits::*;
pub use transport::{LinkState, SerialTransport};
pub use watcher::{DEFAULT_WATCH_INTERVAL, MIN_WATCH_INTERVAL};
