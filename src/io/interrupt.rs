//! Interruptible blocking I/O
//!
//! Thin wrappers over the blocking syscalls used on the packet path and the
//! resolver transport. They behave exactly like the raw calls with one
//! contract on top: EINTR while the process run flag is still set is retried
//! transparently, EINTR after the flag has been cleared (the worker
//! termination signal) surfaces as [`IoOutcome::Interrupted`]. These calls
//! are the only cancellation points in the whole program.

use crate::signal;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Outcome of an interruptible call.
#[derive(Debug, PartialEq, Eq)]
pub enum IoOutcome {
    /// The syscall completed; holds the transferred byte count (0 for
    /// connect).
    Transferred(usize),
    /// The designated termination signal interrupted the call.
    Interrupted,
}

/// Result of waiting for readability with a deadline.
#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome {
    Ready,
    TimedOut,
    Interrupted,
}

fn is_eintr(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EINTR)
}

/// Blocking read. Returns the byte count of one read() call; short reads
/// are the caller's concern, exactly as with the raw syscall.
pub fn read(fd: RawFd, buf: &mut [u8]) -> io::Result<IoOutcome> {
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n >= 0 {
            return Ok(IoOutcome::Transferred(n as usize));
        }

        let err = io::Error::last_os_error();
        if !is_eintr(&err) {
            return Err(err);
        }
        if !signal::keep_running() {
            return Ok(IoOutcome::Interrupted);
        }
    }
}

/// Blocking write of a single buffer.
pub fn write(fd: RawFd, buf: &[u8]) -> io::Result<IoOutcome> {
    loop {
        let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
        if n >= 0 {
            return Ok(IoOutcome::Transferred(n as usize));
        }

        let err = io::Error::last_os_error();
        if !is_eintr(&err) {
            return Err(err);
        }
        if !signal::keep_running() {
            return Ok(IoOutcome::Interrupted);
        }
    }
}

/// Maximum buffer count accepted by [`writev`].
pub const MAX_IOV: usize = 4;

/// Vectored write, used to emit a freshly built header and a payload slice
/// still sitting in the receive buffer as one packet.
pub fn writev(fd: RawFd, bufs: &[&[u8]]) -> io::Result<IoOutcome> {
    debug_assert!(bufs.len() <= MAX_IOV);

    let mut iov = [libc::iovec {
        iov_base: std::ptr::null_mut(),
        iov_len: 0,
    }; MAX_IOV];
    let mut count = 0;
    for buf in bufs {
        if buf.is_empty() {
            continue;
        }
        iov[count] = libc::iovec {
            iov_base: buf.as_ptr() as *mut libc::c_void,
            iov_len: buf.len(),
        };
        count += 1;
    }

    loop {
        let n = unsafe { libc::writev(fd, iov.as_ptr(), count as libc::c_int) };
        if n >= 0 {
            return Ok(IoOutcome::Transferred(n as usize));
        }

        let err = io::Error::last_os_error();
        if !is_eintr(&err) {
            return Err(err);
        }
        if !signal::keep_running() {
            return Ok(IoOutcome::Interrupted);
        }
    }
}

/// Blocking connect. An EINTR'd connect keeps progressing in the kernel, so
/// the retry waits for writability and then reads SO_ERROR instead of
/// calling connect() again. When interrupted by termination the socket is
/// optionally closed so the abandoned path cannot leak the descriptor.
pub fn connect(
    fd: RawFd,
    addr: *const libc::sockaddr,
    addr_len: libc::socklen_t,
    close_fd_on_interrupt: bool,
) -> io::Result<IoOutcome> {
    let rc = unsafe { libc::connect(fd, addr, addr_len) };
    if rc == 0 {
        return Ok(IoOutcome::Transferred(0));
    }

    let err = io::Error::last_os_error();
    if !is_eintr(&err) {
        return Err(err);
    }

    loop {
        if !signal::keep_running() {
            if close_fd_on_interrupt {
                let _ = close(fd);
            }
            return Ok(IoOutcome::Interrupted);
        }

        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLOUT,
            revents: 0,
        };
        let rc = unsafe { libc::poll(&mut pfd, 1, -1) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if is_eintr(&err) {
                continue;
            }
            return Err(err);
        }

        let mut so_error: libc::c_int = 0;
        let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
        let rc = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_ERROR,
                &mut so_error as *mut libc::c_int as *mut libc::c_void,
                &mut len,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        if so_error != 0 {
            return Err(io::Error::from_raw_os_error(so_error));
        }
        return Ok(IoOutcome::Transferred(0));
    }
}

/// Closes a descriptor. EINTR from close() leaves the descriptor state
/// unspecified on Linux but it is in practice closed, so it is not retried.
pub fn close(fd: RawFd) -> io::Result<()> {
    let rc = unsafe { libc::close(fd) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if !is_eintr(&err) {
            return Err(err);
        }
    }
    Ok(())
}

/// Waits until `fd` becomes readable or the timeout elapses. Used to bound
/// resolver round trips.
pub fn wait_readable(fd: RawFd, timeout: Duration) -> io::Result<PollOutcome> {
    let deadline_ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;

    loop {
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let rc = unsafe { libc::poll(&mut pfd, 1, deadline_ms) };
        if rc > 0 {
            return Ok(PollOutcome::Ready);
        }
        if rc == 0 {
            return Ok(PollOutcome::TimedOut);
        }

        let err = io::Error::last_os_error();
        if !is_eintr(&err) {
            return Err(err);
        }
        if !signal::keep_running() {
            return Ok(PollOutcome::Interrupted);
        }
        // A retried poll restarts the full timeout; acceptable for the
        // resolver path, which tolerates a late failure better than a
        // spurious one.
    }
}
