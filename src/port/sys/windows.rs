//! Windows backend: DCB attributes and overlapped I/O.
//!
//! The handle is opened with `FILE_FLAG_OVERLAPPED`; every transfer is issued
//! asynchronously and then waited on explicitly, which is what lets the
//! watcher block on `WaitCommEvent` while the caller reads or writes.

use crate::port::error::PortError;
use crate::port::traits::{FlowControl, Parity, PortConfig, PortIo, SerialBackend};
use std::ffi::OsStr;
use std::io;
use std::mem;
use std::os::windows::ffi::OsStrExt;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use winapi::ctypes::c_void;
use winapi::shared::minwindef::{DWORD, FALSE, TRUE};
use winapi::shared::winerror::{ERROR_IO_PENDING, WAIT_TIMEOUT};
use winapi::um::commapi::{
    ClearCommError, GetCommState, GetCommTimeouts, PurgeComm, SetCommMask, SetCommState,
    SetCommTimeouts, WaitCommEvent,
};
use winapi::um::errhandlingapi::GetLastError;
use winapi::um::fileapi::{CreateFileW, QueryDosDeviceW, ReadFile, WriteFile, OPEN_EXISTING};
use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
use winapi::um::ioapiset::{CancelIo, GetOverlappedResult};
use winapi::um::minwinbase::OVERLAPPED;
use winapi::um::synchapi::{CreateEventW, ResetEvent, WaitForSingleObject};
use winapi::um::winbase::{
    COMMTIMEOUTS, COMSTAT, DCB, DTR_CONTROL_DISABLE, DTR_CONTROL_HANDSHAKE, EVENPARITY,
    EV_RXCHAR, FILE_FLAG_OVERLAPPED, NOPARITY, ODDPARITY, ONESTOPBIT, PURGE_RXABORT,
    PURGE_RXCLEAR, PURGE_TXABORT, PURGE_TXCLEAR, RTS_CONTROL_DISABLE, RTS_CONTROL_HANDSHAKE,
    WAIT_OBJECT_0,
};
use winapi::um::winnt::{GENERIC_READ, GENERIC_WRITE, HANDLE, MAXDWORD};

/// Upper bound a read waits for its first byte.
const READ_WAIT_MS: DWORD = 1000;

/// Size of the buffer handed to `QueryDosDeviceW`.
const DEVICE_TABLE_LEN: usize = 65535;

/// Opens `\\.\COMn` devices with overlapped I/O.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsBackend;

impl SerialBackend for WindowsBackend {
    fn acquire(&self, port: &str) -> Result<Arc<dyn PortIo>, PortError> {
        let path: Vec<u16> = OsStr::new(&format!(r"\\.\{port}"))
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        let handle = unsafe {
            CreateFileW(
                path.as_ptr(),
                GENERIC_READ | GENERIC_WRITE,
                0,
                ptr::null_mut(),
                OPEN_EXISTING,
                FILE_FLAG_OVERLAPPED,
                ptr::null_mut(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return Err(PortError::acquisition(port, io::Error::last_os_error()));
        }

        // From here on dropping `com` closes whatever has been created.
        let mut com = WindowsPort {
            name: port.to_string(),
            handle: AtomicPtr::new(handle),
            read_event: Event::null(),
            write_event: Event::null(),
            watch_event: Event::null(),
            saved_dcb: None,
            saved_timeouts: None,
        };

        com.prepare()
            .map_err(|e| PortError::configuration(port, e.to_string()))?;
        debug!(port, "acquired COM handle");
        Ok(Arc::new(com))
    }
}

/// Manual-reset event owned by a port.
struct Event(HANDLE);

impl Event {
    fn null() -> Self {
        Self(ptr::null_mut())
    }

    fn create() -> io::Result<Self> {
        let handle = unsafe { CreateEventW(ptr::null_mut(), TRUE, FALSE, ptr::null()) };
        if handle.is_null() {
            Err(io::Error::last_os_error())
        } else {
            Ok(Self(handle))
        }
    }

    fn close(&mut self) {
        if !self.0.is_null() {
            unsafe { CloseHandle(self.0) };
            self.0 = ptr::null_mut();
        }
    }
}

fn check(ok: i32) -> io::Result<()> {
    if ok == 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

struct WindowsPort {
    name: String,
    handle: AtomicPtr<c_void>,
    read_event: Event,
    write_event: Event,
    watch_event: Event,
    saved_dcb: Option<DCB>,
    saved_timeouts: Option<COMMTIMEOUTS>,
}

// The raw handles are only used through thread-safe Win32 calls, and each
// event belongs to exactly one kind of operation (read, write, watch).
unsafe impl Send for WindowsPort {}
unsafe impl Sync for WindowsPort {}

impl WindowsPort {
    fn prepare(&mut self) -> io::Result<()> {
        let handle = self.raw()?;

        check(unsafe { SetCommMask(handle, EV_RXCHAR) })?;

        let mut dcb: DCB = unsafe { mem::zeroed() };
        dcb.DCBlength = mem::size_of::<DCB>() as DWORD;
        check(unsafe { GetCommState(handle, &mut dcb) })?;
        self.saved_dcb = Some(dcb);

        let mut timeouts: COMMTIMEOUTS = unsafe { mem::zeroed() };
        check(unsafe { GetCommTimeouts(handle, &mut timeouts) })?;
        self.saved_timeouts = Some(timeouts);

        // Return at once with whatever is queued, else wait up to
        // READ_WAIT_MS for the first byte.
        let mut ours = timeouts;
        ours.ReadIntervalTimeout = MAXDWORD;
        ours.ReadTotalTimeoutMultiplier = MAXDWORD;
        ours.ReadTotalTimeoutConstant = READ_WAIT_MS;
        ours.WriteTotalTimeoutMultiplier = 0;
        ours.WriteTotalTimeoutConstant = 0;
        check(unsafe { SetCommTimeouts(handle, &mut ours) })?;

        self.read_event = Event::create()?;
        self.write_event = Event::create()?;
        self.watch_event = Event::create()?;
        Ok(())
    }

    fn raw(&self) -> io::Result<HANDLE> {
        let handle = self.handle.load(Ordering::Acquire);
        if handle.is_null() {
            Err(io::Error::new(io::ErrorKind::NotConnected, "port released"))
        } else {
            Ok(handle)
        }
    }

    /// Issue an overlapped transfer and block until it completes.
    fn transfer(
        &self,
        event: &Event,
        issue: impl FnOnce(HANDLE, *mut DWORD, *mut OVERLAPPED) -> i32,
    ) -> io::Result<usize> {
        let handle = self.raw()?;
        let mut overlapped: OVERLAPPED = unsafe { mem::zeroed() };
        overlapped.hEvent = event.0;
        let mut transferred: DWORD = 0;

        unsafe { ResetEvent(event.0) };
        if issue(handle, &mut transferred, &mut overlapped) == 0 {
            let err = unsafe { GetLastError() };
            if err != ERROR_IO_PENDING {
                return Err(io::Error::from_raw_os_error(err as i32));
            }
            check(unsafe { GetOverlappedResult(handle, &mut overlapped, &mut transferred, TRUE) })?;
        }
        Ok(transferred as usize)
    }

    fn queued_input(&self, handle: HANDLE) -> io::Result<u32> {
        let mut errors: DWORD = 0;
        let mut stat: COMSTAT = unsafe { mem::zeroed() };
        check(unsafe { ClearCommError(handle, &mut errors, &mut stat) })?;
        Ok(stat.cbInQue)
    }
}

impl PortIo for WindowsPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply_config(&self, config: &PortConfig) -> io::Result<()> {
        let handle = self.raw()?;
        let mut dcb: DCB = unsafe { mem::zeroed() };
        dcb.DCBlength = mem::size_of::<DCB>() as DWORD;
        check(unsafe { GetCommState(handle, &mut dcb) })?;

        // CBR_* constants equal their numeric rate.
        dcb.BaudRate = config.baud() as DWORD;
        dcb.ByteSize = config.data_bits();
        dcb.StopBits = ONESTOPBIT as _;
        dcb.set_fBinary(TRUE as DWORD);
        let (parity, parity_check) = match config.parity() {
            Parity::None => (NOPARITY, FALSE),
            Parity::Odd => (ODDPARITY, TRUE),
            Parity::Even => (EVENPARITY, TRUE),
        };
        dcb.Parity = parity as _;
        dcb.set_fParity(parity_check as DWORD);

        let (cts_dsr, dtr_rts, xon_xoff) = match config.flow_control() {
            FlowControl::None => (false, false, false),
            FlowControl::Hardware => (true, true, false),
            FlowControl::Software => (false, false, true),
        };
        dcb.set_fOutxCtsFlow(cts_dsr as DWORD);
        dcb.set_fOutxDsrFlow(cts_dsr as DWORD);
        dcb.set_fDtrControl(if dtr_rts { DTR_CONTROL_HANDSHAKE } else { DTR_CONTROL_DISABLE });
        dcb.set_fRtsControl(if dtr_rts { RTS_CONTROL_HANDSHAKE } else { RTS_CONTROL_DISABLE });
        dcb.set_fOutX(xon_xoff as DWORD);
        dcb.set_fInX(xon_xoff as DWORD);

        check(unsafe { SetCommState(handle, &mut dcb) })
    }

    fn flush(&self) -> io::Result<()> {
        let handle = self.raw()?;
        check(unsafe { PurgeComm(handle, PURGE_RXCLEAR | PURGE_TXCLEAR) })
    }

    fn blocking_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len().min(DWORD::MAX as usize) as DWORD;
        self.transfer(&self.read_event, |handle, done, overlapped| unsafe {
            ReadFile(handle, buf.as_mut_ptr().cast(), len, done, overlapped)
        })
    }

    fn blocking_write(&self, data: &[u8]) -> io::Result<usize> {
        let len = data.len().min(DWORD::MAX as usize) as DWORD;
        self.transfer(&self.write_event, |handle, done, overlapped| unsafe {
            WriteFile(handle, data.as_ptr().cast(), len, done, overlapped)
        })
    }

    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        let handle = self.raw()?;

        // EV_RXCHAR only fires for characters arriving after the wait starts.
        if self.queued_input(handle)? > 0 {
            return Ok(true);
        }

        let mut overlapped: OVERLAPPED = unsafe { mem::zeroed() };
        overlapped.hEvent = self.watch_event.0;
        let mut mask: DWORD = 0;
        unsafe { ResetEvent(self.watch_event.0) };

        if unsafe { WaitCommEvent(handle, &mut mask, &mut overlapped) } == 0 {
            let err = unsafe { GetLastError() };
            if err != ERROR_IO_PENDING {
                return Err(io::Error::from_raw_os_error(err as i32));
            }

            let millis = timeout.as_millis().min(u128::from(MAXDWORD - 1)) as DWORD;
            let mut ignored: DWORD = 0;
            match unsafe { WaitForSingleObject(self.watch_event.0, millis) } {
                WAIT_OBJECT_0 => {
                    check(unsafe {
                        GetOverlappedResult(handle, &mut overlapped, &mut ignored, FALSE)
                    })?;
                }
                WAIT_TIMEOUT => {
                    // The OVERLAPPED lives on this stack frame; wait for the
                    // cancelled request to retire before returning.
                    unsafe {
                        CancelIo(handle);
                        GetOverlappedResult(handle, &mut overlapped, &mut ignored, TRUE);
                    }
                    return Ok(false);
                }
                _ => return Err(io::Error::last_os_error()),
            }
        }

        Ok(mask & EV_RXCHAR != 0)
    }

    fn wake(&self) {
        // Re-arming the mask completes a pending WaitCommEvent with mask 0.
        if let Ok(handle) = self.raw() {
            unsafe { SetCommMask(handle, EV_RXCHAR) };
        }
    }

    fn is_valid(&self) -> bool {
        !self.handle.load(Ordering::Acquire).is_null()
    }

    fn release(&self) -> io::Result<()> {
        let handle = self.handle.swap(ptr::null_mut(), Ordering::AcqRel);
        if handle.is_null() {
            return Ok(());
        }

        let mut result = Ok(());
        unsafe {
            SetCommMask(handle, EV_RXCHAR);
            if let Some(mut dcb) = self.saved_dcb {
                result = result.and(check(SetCommState(handle, &mut dcb)));
            }
            if let Some(mut timeouts) = self.saved_timeouts {
                result = result.and(check(SetCommTimeouts(handle, &mut timeouts)));
            }
            PurgeComm(
                handle,
                PURGE_RXABORT | PURGE_TXABORT | PURGE_RXCLEAR | PURGE_TXCLEAR,
            );
            result = result.and(check(CloseHandle(handle)));
        }
        debug!(port = %self.name, "released COM handle");
        result
    }
}

impl Drop for WindowsPort {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(port = %self.name, error = %e, "failed to release COM handle");
        }
        self.read_event.close();
        self.write_event.close();
        self.watch_event.close();
    }
}

/// Raw contents of the DOS device table: NUL-separated UTF-16 names.
pub(crate) fn dos_device_table() -> io::Result<Vec<u16>> {
    let mut table = vec![0u16; DEVICE_TABLE_LEN];
    let len = unsafe {
        QueryDosDeviceW(ptr::null(), table.as_mut_ptr(), DEVICE_TABLE_LEN as DWORD)
    };
    if len == 0 {
        return Err(io::Error::last_os_error());
    }
    table.truncate(len as usize);
    Ok(table)
}
