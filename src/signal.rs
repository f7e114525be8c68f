//! Process run flag and signal plumbing
//!
//! Worker threads block in read()/write()/connect() most of the time, so the
//! only way to cancel them is to interrupt the syscall with a signal. The
//! termination signal is installed without SA_RESTART; its handler does
//! nothing, which is exactly the point: the interrupted syscall returns
//! EINTR and the worker then consults the run flag.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

/// Signal delivered to individual worker threads to break them out of
/// blocking I/O during shutdown.
pub const TERMINATION_SIGNAL: libc::c_int = libc::SIGUSR1;

static RUNNING: AtomicBool = AtomicBool::new(true);

/// Whether translation should keep going. Checked by workers after every
/// interrupted syscall and by the supervisor's monitor loop.
pub fn keep_running() -> bool {
    RUNNING.load(Ordering::SeqCst)
}

/// Ask every thread to wind down. Safe to call from signal handlers.
pub fn request_shutdown() {
    RUNNING.store(false, Ordering::SeqCst);
}

/// Re-arm the run flag. Must happen before the supervisor starts.
pub fn rearm() {
    RUNNING.store(true, Ordering::SeqCst);
}

extern "C" fn handle_shutdown_signal(_signal: libc::c_int) {
    RUNNING.store(false, Ordering::SeqCst);
}

extern "C" fn handle_termination_signal(_signal: libc::c_int) {
    // Intentionally empty; the EINTR is the message.
}

/// Installs SIGINT/SIGTERM shutdown handlers and the worker termination
/// handler. None of them use SA_RESTART, so blocking syscalls in the
/// signalled thread return EINTR.
pub fn install_handlers() -> io::Result<()> {
    unsafe {
        install(libc::SIGINT, handle_shutdown_signal as libc::sighandler_t)?;
        install(libc::SIGTERM, handle_shutdown_signal as libc::sighandler_t)?;
        install(TERMINATION_SIGNAL, handle_termination_signal as libc::sighandler_t)?;
    }
    Ok(())
}

unsafe fn install(signal: libc::c_int, handler: libc::sighandler_t) -> io::Result<()> {
    let mut action: libc::sigaction = std::mem::zeroed();
    action.sa_sigaction = handler;
    action.sa_flags = 0;
    libc::sigemptyset(&mut action.sa_mask);

    if libc::sigaction(signal, &action, std::ptr::null_mut()) < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
