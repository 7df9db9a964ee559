//! Native backends, one per OS I/O model.

#[cfg(unix)]
pub mod posix;

#[cfg(windows)]
pub mod windows;

#[cfg(unix)]
pub use posix::PosixBackend as NativeBackend;

#[cfg(windows)]
pub use windows::WindowsBackend as NativeBackend;
