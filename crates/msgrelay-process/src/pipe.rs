//! Anonymous pipes for a child's standard streams.
//!
//! Both ends of a new pipe are kept out of every child. Spawning hands the
//! child its end as a fresh standard handle, so nothing else leaks into it,
//! including children spawned concurrently by other threads.

use std::io;
use std::sync::MutexGuard;

#[cfg(unix)]
pub(crate) type PipeEnd = std::os::fd::OwnedFd;

#[cfg(windows)]
pub(crate) type PipeEnd = std::os::windows::io::OwnedHandle;

/// A unidirectional pipe: bytes written to `write` come out of `read`.
#[derive(Debug)]
pub(crate) struct Pipe {
    pub(crate) read: PipeEnd,
    pub(crate) write: PipeEnd,
}

/// Whether a pipe can be created close-on-exec in a single call.
#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly",
    windows
))]
const ATOMIC_CREATE: bool = true;

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly",
    windows
)))]
const ATOMIC_CREATE: bool = false;

static CREATE_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Serialize pipe creation and spawning where pipes cannot be created
/// non-inheritable atomically. Hold the guard from [`Pipe::new`] until the
/// child is spawned.
pub(crate) fn creation_guard() -> Option<MutexGuard<'static, ()>> {
    if ATOMIC_CREATE {
        return None;
    }
    Some(
        CREATE_LOCK
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner),
    )
}

#[cfg(unix)]
impl Pipe {
    /// Create a pipe. Where the platform allows, both ends are already
    /// close-on-exec when this returns.
    pub(crate) fn new() -> io::Result<Self> {
        use std::os::fd::FromRawFd;

        let mut fds = [0 as libc::c_int; 2];
        if create_raw(&mut fds) != 0 {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: the pipe was just created, so both descriptors are open and
        // owned by nobody else.
        let (read, write) = unsafe {
            (
                std::os::fd::OwnedFd::from_raw_fd(fds[0]),
                std::os::fd::OwnedFd::from_raw_fd(fds[1]),
            )
        };
        Ok(Self { read, write })
    }

    /// Make sure neither end survives an exec. A no-op where [`Pipe::new`]
    /// set the flag atomically.
    pub(crate) fn restrict_inheritance(&self) -> io::Result<()> {
        if ATOMIC_CREATE {
            return Ok(());
        }
        set_cloexec(&self.read)?;
        set_cloexec(&self.write)
    }
}

#[cfg(all(unix, any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
fn create_raw(fds: &mut [libc::c_int; 2]) -> libc::c_int {
    // SAFETY: `fds` is a writable array of two descriptors, as pipe2(2) expects.
    unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) }
}

#[cfg(all(unix, not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))))]
fn create_raw(fds: &mut [libc::c_int; 2]) -> libc::c_int {
    // SAFETY: `fds` is a writable array of two descriptors, as pipe(2) expects.
    unsafe { libc::pipe(fds.as_mut_ptr()) }
}

#[cfg(unix)]
fn set_cloexec(end: &PipeEnd) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let fd = end.as_raw_fd();
    // SAFETY: `fd` is an open descriptor borrowed from `end`.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above; only the descriptor flags are changed.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(windows)]
impl Pipe {
    /// Create a pipe whose handles are not inheritable.
    pub(crate) fn new() -> io::Result<Self> {
        use std::os::windows::io::{FromRawHandle, RawHandle};
        use windows_sys::Win32::Foundation::HANDLE;
        use windows_sys::Win32::System::Pipes::CreatePipe;

        let mut read: HANDLE = std::ptr::null_mut();
        let mut write: HANDLE = std::ptr::null_mut();

        // SAFETY: both out-pointers reference live locals; null attributes
        // make the handles non-inheritable.
        let ok = unsafe { CreatePipe(&mut read, &mut write, std::ptr::null(), 0) };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: CreatePipe succeeded, so both handles are valid and owned
        // by nobody else.
        let (read, write) = unsafe {
            (
                std::os::windows::io::OwnedHandle::from_raw_handle(read as RawHandle),
                std::os::windows::io::OwnedHandle::from_raw_handle(write as RawHandle),
            )
        };
        Ok(Self { read, write })
    }

    /// Clear the inherit flag on both ends.
    ///
    /// Spawning duplicates the child's end into an inheritable standard
    /// handle on its own.
    pub(crate) fn restrict_inheritance(&self) -> io::Result<()> {
        use std::os::windows::io::AsRawHandle;
        use windows_sys::Win32::Foundation::{SetHandleInformation, HANDLE_FLAG_INHERIT};

        for end in [&self.read, &self.write] {
            // SAFETY: the handle is valid for the lifetime of `end`.
            let ok =
                unsafe { SetHandleInformation(end.as_raw_handle() as _, HANDLE_FLAG_INHERIT, 0) };
            if ok == 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }
}
