//! Serial port discovery.
//!
//! [`enumerate`] never fails: a source that cannot be read is logged and
//! skipped, and the caller gets whatever the remaining sources produced.
//! Results are sorted in natural order (`ttyUSB2` before `ttyUSB10`) and
//! exact duplicates removed, so a device reachable both directly and through
//! a by-id alias is listed once.

use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_DEVICE_DIR: &str = "/dev";
pub const DEFAULT_BY_ID_DIR: &str = "/dev/serial/by-id";

/// Prefixes of USB-serial nodes, listed without probing.
pub const USB_PREFIXES: [&str; 2] = ["ttyUSB", "ttyACM"];

/// Prefixes of on-board UART nodes, listed only if the driver confirms a port.
pub const LEGACY_PREFIXES: [&str; 1] = ["ttyS"];

static COM_PORT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^COM\d+$").expect("valid regex"));

/// List the serial ports present on this host.
pub fn enumerate() -> Vec<String> {
    let ports = native_ports();
    debug!(count = ports.len(), "enumerated serial ports");
    ports
}

#[cfg(target_os = "linux")]
fn native_ports() -> Vec<String> {
    Enumerator::default().scan()
}

#[cfg(windows)]
fn native_ports() -> Vec<String> {
    match super::sys::windows::dos_device_table() {
        Ok(table) => sort_and_dedup(com_ports_from_device_table(&table)),
        Err(e) => {
            warn!(error = %e, "cannot query DOS device table");
            Vec::new()
        }
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
fn native_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => sort_and_dedup(ports.into_iter().map(|p| p.port_name).collect()),
        Err(e) => {
            warn!(error = %e, "cannot list serial ports");
            Vec::new()
        }
    }
}

type Probe = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// Directory-scanning enumerator for Linux-style device trees.
///
/// The directories and node prefixes are configurable so the scan can run
/// against a synthetic tree or pick up board-specific UARTs;
/// [`Enumerator::default`] points at `/dev`.
#[derive(Clone)]
pub struct Enumerator {
    device_dir: PathBuf,
    by_id_dir: PathBuf,
    usb_prefixes: Vec<String>,
    legacy_prefixes: Vec<String>,
    probe: Probe,
}

impl Default for Enumerator {
    fn default() -> Self {
        Self::new(DEFAULT_DEVICE_DIR, DEFAULT_BY_ID_DIR)
    }
}

impl std::fmt::Debug for Enumerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enumerator")
            .field("device_dir", &self.device_dir)
            .field("by_id_dir", &self.by_id_dir)
            .field("usb_prefixes", &self.usb_prefixes)
            .field("legacy_prefixes", &self.legacy_prefixes)
            .finish()
    }
}

impl Enumerator {
    pub fn new(device_dir: impl Into<PathBuf>, by_id_dir: impl Into<PathBuf>) -> Self {
        Self {
            device_dir: device_dir.into(),
            by_id_dir: by_id_dir.into(),
            usb_prefixes: USB_PREFIXES.iter().map(|p| p.to_string()).collect(),
            legacy_prefixes: LEGACY_PREFIXES.iter().map(|p| p.to_string()).collect(),
            probe: Arc::new(default_probe),
        }
    }

    /// Replace the node-name prefixes. `usb` nodes are listed as found,
    /// `legacy` nodes only when the probe confirms them.
    pub fn with_prefixes<S: AsRef<str>>(mut self, usb: &[S], legacy: &[S]) -> Self {
        self.usb_prefixes = usb.iter().map(|p| p.as_ref().to_string()).collect();
        self.legacy_prefixes = legacy.iter().map(|p| p.as_ref().to_string()).collect();
        self
    }

    /// Replace the check applied to legacy UART nodes.
    pub fn with_probe(mut self, probe: impl Fn(&Path) -> bool + Send + Sync + 'static) -> Self {
        self.probe = Arc::new(probe);
        self
    }

    pub fn scan(&self) -> Vec<String> {
        let mut found = Vec::new();
        self.scan_device_dir(&mut found);
        self.scan_by_id(&mut found);
        sort_and_dedup(found)
    }

    fn scan_device_dir(&self, found: &mut Vec<String>) {
        let entries = match fs::read_dir(&self.device_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.device_dir.display(), error = %e, "cannot open device directory");
                return;
            }
        };
        // Canonical base so direct entries compare equal to resolved aliases.
        let base = fs::canonicalize(&self.device_dir).unwrap_or_else(|_| self.device_dir.clone());

        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let path = base.join(name);

            if self.usb_prefixes.iter().any(|p| name.starts_with(p.as_str())) {
                found.push(path.to_string_lossy().into_owned());
            } else if self.legacy_prefixes.iter().any(|p| name.starts_with(p.as_str()))
                && (self.probe)(&path)
            {
                found.push(path.to_string_lossy().into_owned());
            }
        }
    }

    fn scan_by_id(&self, found: &mut Vec<String>) {
        let entries = match fs::read_dir(&self.by_id_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %self.by_id_dir.display(), error = %e, "no by-id aliases");
                return;
            }
        };

        for entry in entries.flatten() {
            match fs::canonicalize(entry.path()) {
                Ok(real) => found.push(real.to_string_lossy().into_owned()),
                Err(e) => {
                    debug!(alias = %entry.path().display(), error = %e, "dangling serial alias")
                }
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn default_probe(path: &Path) -> bool {
    super::sys::posix::probe_uart(path)
}

#[cfg(not(target_os = "linux"))]
fn default_probe(_path: &Path) -> bool {
    false
}

/// Extract `COMn` names from a NUL-separated UTF-16 device table.
pub fn com_ports_from_device_table(table: &[u16]) -> Vec<String> {
    table
        .split(|&unit| unit == 0)
        .filter(|name| !name.is_empty())
        .map(String::from_utf16_lossy)
        .filter(|name| COM_PORT.is_match(name))
        .collect()
}

/// Sort names naturally, then drop adjacent exact duplicates.
pub fn sort_and_dedup(mut names: Vec<String>) -> Vec<String> {
    names.sort_by(|a, b| natural_cmp(a, b).then_with(|| a.cmp(b)));
    names.dedup();
    names
}

/// Compare two strings treating runs of ASCII digits as numbers.
///
/// `"ttyUSB2" < "ttyUSB10"`. Digit runs that differ only in leading zeros
/// compare equal.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (mut a, mut b) = (a.as_bytes(), b.as_bytes());

    loop {
        match (a.first(), b.first()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let (num_a, rest_a) = split_digits(a);
                let (num_b, rest_b) = split_digits(b);
                match cmp_digit_runs(num_a, num_b) {
                    Ordering::Equal => {}
                    unequal => return unequal,
                }
                a = rest_a;
                b = rest_b;
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(y);
                }
                a = &a[1..];
                b = &b[1..];
            }
        }
    }
}

fn split_digits(s: &[u8]) -> (&[u8], &[u8]) {
    let end = s.iter().position(|c| !c.is_ascii_digit()).unwrap_or(s.len());
    s.split_at(end)
}

fn cmp_digit_runs(a: &[u8], b: &[u8]) -> Ordering {
    let trim = |s: &[u8]| -> usize { s.iter().position(|&c| c != b'0').unwrap_or(s.len()) };
    let (a, b) = (&a[trim(a)..], &b[trim(b)..]);
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_natural_order() {
        assert_eq!(natural_cmp("ttyUSB2", "ttyUSB10"), Ordering::Less);
        assert_eq!(natural_cmp("ttyS10", "ttyUSB0"), Ordering::Less);
        assert_eq!(natural_cmp("COM9", "COM10"), Ordering::Less);
        assert_eq!(natural_cmp("ttyUSB007", "ttyUSB7"), Ordering::Equal);
        assert_eq!(natural_cmp("ttyUSB", "ttyUSB0"), Ordering::Less);
    }

    #[test]
    fn test_sort_and_dedup() {
        let sorted = sort_and_dedup(strings(&["ttyUSB10", "ttyUSB2", "ttyUSB1", "ttyUSB2"]));
        assert_eq!(sorted, strings(&["ttyUSB1", "ttyUSB2", "ttyUSB10"]));
    }

    #[test]
    fn test_leading_zero_tie_is_deterministic() {
        let one = sort_and_dedup(strings(&["ttyS01", "ttyS1"]));
        let other = sort_and_dedup(strings(&["ttyS1", "ttyS01"]));
        assert_eq!(one, other);
    }

    #[test]
    fn test_com_ports_from_device_table() {
        let mut table: Vec<u16> = Vec::new();
        for name in ["COM10", "LPT1", "COM3", "HarddiskVolume1", "COM", "COMX1", "COM1"] {
            table.extend(name.encode_utf16());
            table.push(0);
        }
        table.push(0);

        let ports = sort_and_dedup(com_ports_from_device_table(&table));
        assert_eq!(ports, strings(&["COM1", "COM3", "COM10"]));
    }

    #[test]
    fn test_missing_device_dir_yields_nothing() {
        let enumerator = Enumerator::new("/nonexistent/dev", "/nonexistent/by-id");
        assert!(enumerator.scan().is_empty());
    }
}
