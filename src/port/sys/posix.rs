//! POSIX backend: termios attributes and `poll(2)` readiness.

use crate::port::error::PortError;
use crate::port::traits::{FlowControl, Parity, PortConfig, PortIo, SerialBackend};
use std::ffi::CString;
use std::io;
use std::mem;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const NO_FD: libc::c_int = -1;

/// Longest a read waits for the first byte, matching the Windows read timeout.
const READ_WAIT: Duration = Duration::from_millis(1000);

/// Opens tty devices through `open(2)` and configures them with termios.
#[derive(Debug, Default, Clone, Copy)]
pub struct PosixBackend;

impl SerialBackend for PosixBackend {
    fn acquire(&self, port: &str) -> Result<Arc<dyn PortIo>, PortError> {
        let path = CString::new(port).map_err(|_| {
            PortError::acquisition(
                port,
                io::Error::new(io::ErrorKind::InvalidInput, "port name contains a NUL byte"),
            )
        })?;

        // O_NONBLOCK so a modem line without carrier cannot stall the open.
        let fd = unsafe {
            libc::open(
                path.as_ptr(),
                libc::O_RDWR | libc::O_NOCTTY | libc::O_NONBLOCK | libc::O_CLOEXEC,
            )
        };
        if fd < 0 {
            return Err(PortError::acquisition(port, io::Error::last_os_error()));
        }

        match prepare(fd) {
            Ok(saved) => {
                debug!(port, fd, "acquired tty");
                Ok(Arc::new(PosixPort {
                    name: port.to_string(),
                    fd: AtomicI32::new(fd),
                    saved,
                }))
            }
            Err(e) => {
                unsafe { libc::close(fd) };
                Err(PortError::configuration(port, e.to_string()))
            }
        }
    }
}

/// Take exclusive access, snapshot the current attributes and switch the
/// descriptor back to blocking mode.
fn prepare(fd: libc::c_int) -> io::Result<libc::termios> {
    if unsafe { libc::ioctl(fd, libc::TIOCEXCL as _) } < 0 {
        warn!(fd, error = %io::Error::last_os_error(), "TIOCEXCL failed, port is not exclusive");
    }

    let mut saved: libc::termios = unsafe { mem::zeroed() };
    cvt(unsafe { libc::tcgetattr(fd, &mut saved) })?;

    let flags = cvt(unsafe { libc::fcntl(fd, libc::F_GETFL) })?;
    cvt(unsafe { libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) })?;

    Ok(saved)
}

fn cvt(rc: libc::c_int) -> io::Result<libc::c_int> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

fn speed_for(baud: u32) -> libc::speed_t {
    match baud {
        300 => libc::B300,
        600 => libc::B600,
        1200 => libc::B1200,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        _ => libc::B19200,
    }
}

/// Raw-mode termios for `config`, starting from `base` so that control
/// characters other than VMIN/VTIME keep their current values.
fn raw_termios(base: &libc::termios, config: &PortConfig) -> io::Result<libc::termios> {
    let mut tio = *base;

    tio.c_cflag = libc::CREAD
        | match config.data_bits() {
            5 => libc::CS5,
            6 => libc::CS6,
            7 => libc::CS7,
            _ => libc::CS8,
        };
    match config.parity() {
        Parity::None => {}
        Parity::Odd => tio.c_cflag |= libc::PARENB | libc::PARODD,
        Parity::Even => tio.c_cflag |= libc::PARENB,
    }

    tio.c_iflag = libc::IGNPAR | libc::IGNBRK;
    match config.flow_control() {
        FlowControl::None => tio.c_cflag |= libc::CLOCAL,
        FlowControl::Hardware => tio.c_cflag |= libc::CRTSCTS,
        FlowControl::Software => tio.c_iflag |= libc::IXON | libc::IXOFF,
    }

    tio.c_oflag = 0;
    tio.c_lflag = 0;
    tio.c_cc[libc::VMIN] = 1;
    tio.c_cc[libc::VTIME] = 0;

    let speed = speed_for(config.baud());
    cvt(unsafe { libc::cfsetispeed(&mut tio, speed) })?;
    cvt(unsafe { libc::cfsetospeed(&mut tio, speed) })?;
    Ok(tio)
}

/// An open tty plus the termios it had before we touched it.
struct PosixPort {
    name: String,
    fd: AtomicI32,
    saved: libc::termios,
}

impl PosixPort {
    fn fd(&self) -> io::Result<libc::c_int> {
        match self.fd.load(Ordering::Acquire) {
            NO_FD => Err(io::Error::new(io::ErrorKind::NotConnected, "port released")),
            fd => Ok(fd),
        }
    }
}

impl PortIo for PosixPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply_config(&self, config: &PortConfig) -> io::Result<()> {
        let fd = self.fd()?;
        let mut current: libc::termios = unsafe { mem::zeroed() };
        cvt(unsafe { libc::tcgetattr(fd, &mut current) })?;
        let tio = raw_termios(&current, config)?;
        cvt(unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) })?;
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        let fd = self.fd()?;
        cvt(unsafe { libc::tcflush(fd, libc::TCIOFLUSH) })?;
        Ok(())
    }

    fn blocking_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.wait_readable(READ_WAIT)? {
            return Ok(0);
        }
        let fd = self.fd()?;
        loop {
            let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => return Ok(0),
                _ => return Err(err),
            }
        }
    }

    fn blocking_write(&self, data: &[u8]) -> io::Result<usize> {
        let fd = self.fd()?;
        loop {
            let n = unsafe { libc::write(fd, data.as_ptr().cast(), data.len()) };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => return Ok(0),
                _ => return Err(err),
            }
        }
    }

    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        let fd = self.fd()?;
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

        let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            return if err.kind() == io::ErrorKind::Interrupted {
                Ok(false)
            } else {
                Err(err)
            };
        }
        if rc == 0 {
            return Ok(false);
        }
        if pfd.revents & libc::POLLIN != 0 {
            return Ok(true);
        }
        if pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("poll reported revents {:#x}", pfd.revents),
            ));
        }
        Ok(false)
    }

    fn is_valid(&self) -> bool {
        self.fd.load(Ordering::Acquire) != NO_FD
    }

    fn release(&self) -> io::Result<()> {
        let fd = self.fd.swap(NO_FD, Ordering::AcqRel);
        if fd == NO_FD {
            return Ok(());
        }

        let restored = cvt(unsafe { libc::tcsetattr(fd, libc::TCSANOW, &self.saved) });
        unsafe {
            libc::tcflush(fd, libc::TCIOFLUSH);
        }
        let closed = cvt(unsafe { libc::close(fd) });
        debug!(port = %self.name, fd, "released tty");

        restored?;
        closed?;
        Ok(())
    }
}

impl Drop for PosixPort {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(port = %self.name, error = %e, "failed to release tty");
        }
    }
}

/// Mirror of `struct serial_struct` from `<linux/serial.h>`.
#[cfg(target_os = "linux")]
#[repr(C)]
struct SerialInfo {
    port_type: libc::c_int,
    line: libc::c_int,
    port: libc::c_uint,
    irq: libc::c_int,
    flags: libc::c_int,
    xmit_fifo_size: libc::c_int,
    custom_divisor: libc::c_int,
    baud_base: libc::c_int,
    close_delay: libc::c_ushort,
    io_type: libc::c_char,
    reserved_char: [libc::c_char; 1],
    hub6: libc::c_int,
    closing_wait: libc::c_ushort,
    closing_wait2: libc::c_ushort,
    iomem_base: *mut libc::c_uchar,
    iomem_reg_shift: libc::c_ushort,
    port_high: libc::c_uint,
    iomap_base: libc::c_ulong,
}

/// `PORT_UNKNOWN` from `<linux/serial.h>`.
#[cfg(target_os = "linux")]
const PORT_UNKNOWN: libc::c_int = 0;

/// Ask the driver whether a legacy `ttyS*` node is backed by a real UART.
///
/// The probe descriptor is always closed before returning.
#[cfg(target_os = "linux")]
pub(crate) fn probe_uart(path: &std::path::Path) -> bool {
    use std::os::unix::ffi::OsStrExt;

    let Ok(cpath) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    let fd = unsafe {
        libc::open(
            cpath.as_ptr(),
            libc::O_RDWR | libc::O_NOCTTY | libc::O_NONBLOCK | libc::O_CLOEXEC,
        )
    };
    if fd < 0 {
        debug!(path = %path.display(), error = %io::Error::last_os_error(), "cannot open port");
        return false;
    }

    let mut info: SerialInfo = unsafe { mem::zeroed() };
    let rc = unsafe { libc::ioctl(fd, libc::TIOCGSERIAL as _, &mut info as *mut SerialInfo) };
    let query = if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(info.port_type)
    };
    unsafe { libc::close(fd) };

    match query {
        Ok(port_type) => port_type != PORT_UNKNOWN,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "cannot get serial info");
            false
        }
    }
}
