//! Signal wiring: SIGINT/SIGTERM set a flag and poke the event-loop
//! waker; SIGPIPE is ignored so a peer closing mid-write surfaces as an
//! `EPIPE` write error. Only async-signal-safe operations run in the
//! handler itself.

use crate::server::ShutdownHandle;
use anyhow::{Result, bail};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

/// Set by the handler; the event loop checks it after every wait.
pub static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Eventfd the handler writes to. Stored as a raw descriptor because the
/// handler cannot touch anything that locks or allocates.
static WAKE_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn on_terminate(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
    let fd = WAKE_FD.load(Ordering::SeqCst);
    if fd >= 0 {
        let one: u64 = 1;
        unsafe {
            libc::write(fd, (&raw const one).cast(), std::mem::size_of::<u64>());
        }
    }
}

/// Installs the handlers. Call once, after the server (and its waker)
/// exist but before `run`.
pub fn install(handle: &ShutdownHandle) -> Result<()> {
    WAKE_FD.store(handle.waker_fd(), Ordering::SeqCst);

    if unsafe { libc::signal(libc::SIGPIPE, libc::SIG_IGN) } == libc::SIG_ERR {
        bail!("signal(SIGPIPE): {}", std::io::Error::last_os_error());
    }
    let handler: extern "C" fn(libc::c_int) = on_terminate;
    for sig in [libc::SIGINT, libc::SIGTERM] {
        if unsafe { libc::signal(sig, handler as libc::sighandler_t) } == libc::SIG_ERR {
            bail!("signal({sig}): {}", std::io::Error::last_os_error());
        }
    }
    Ok(())
}
