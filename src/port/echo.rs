//! Hex echo of transferred bytes for debugging.

use parking_lot::Mutex;
use std::fmt::Write as _;
use std::io::{self, Write};
use std::sync::Arc;

/// A shared writer that receives the debug echo.
pub type DiagnosticSink = Arc<Mutex<dyn Write + Send>>;

/// Render bytes as lowercase two-digit hex separated by single spaces.
pub fn format_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Writes one `Read: ..` / `Write: ..` line per transfer while enabled.
pub(crate) struct HexEcho {
    enabled: bool,
    sink: DiagnosticSink,
}

impl HexEcho {
    pub(crate) fn new() -> Self {
        Self {
            enabled: false,
            sink: Arc::new(Mutex::new(io::stderr())),
        }
    }

    pub(crate) fn enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub(crate) fn set_sink(&mut self, sink: DiagnosticSink) {
        self.sink = sink;
    }

    pub(crate) fn read(&self, bytes: &[u8]) {
        self.line("Read", bytes);
    }

    pub(crate) fn write(&self, bytes: &[u8]) {
        self.line("Write", bytes);
    }

    fn line(&self, direction: &str, bytes: &[u8]) {
        if !self.enabled || bytes.is_empty() {
            return;
        }
        let mut sink = self.sink.lock();
        // Diagnostics must never fail a transfer.
        let _ = writeln!(sink, "{direction}: {}", format_hex(bytes));
        let _ = sink.flush();
    }
}
