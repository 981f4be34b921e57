//! Listening socket setup.

use crate::config::Linger;
use anyhow::{Context, Result, bail};
use std::net::{SocketAddr, TcpListener};
use std::os::unix::io::AsRawFd;

/// Binds the accept socket nonblocking and applies the configured close
/// behavior.
pub fn bind(addr: SocketAddr, linger: Linger) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr).with_context(|| format!("bind {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("set listener nonblocking")?;
    apply_linger(&listener, linger)?;
    Ok(listener)
}

/// Sets `SO_LINGER` on the listener; accepted sockets inherit it.
fn apply_linger(listener: &TcpListener, linger: Linger) -> Result<()> {
    let value = match linger {
        Linger::Off => return Ok(()),
        // Zero timeout closes with RST, discarding unsent data.
        Linger::Abort => libc::linger { l_onoff: 1, l_linger: 0 },
        Linger::Wait(secs) => libc::linger {
            l_onoff: 1,
            l_linger: secs as libc::c_int,
        },
    };
    let rc = unsafe {
        libc::setsockopt(
            listener.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_LINGER,
            (&raw const value).cast(),
            std::mem::size_of::<libc::linger>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        bail!("setsockopt SO_LINGER: {}", std::io::Error::last_os_error());
    }
    Ok(())
}
