//! Thin epoll wrapper plus the eventfd waker.

use crate::config::TriggerMode;
use anyhow::{Context, Result, bail};
use std::os::unix::io::RawFd;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Writable,
}

fn event_flags(interest: Interest, trigger: TriggerMode, oneshot: bool) -> u32 {
    let mut flags = match interest {
        Interest::Readable => libc::EPOLLIN,
        Interest::Writable => libc::EPOLLOUT,
    } as u32;
    flags |= libc::EPOLLRDHUP as u32;
    if trigger == TriggerMode::Edge {
        flags |= libc::EPOLLET as u32;
    }
    if oneshot {
        flags |= libc::EPOLLONESHOT as u32;
    }
    flags
}

pub struct Poller {
    epfd: RawFd,
}

impl Poller {
    pub fn new() -> Result<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            bail!("epoll_create1: {}", std::io::Error::last_os_error());
        }
        Ok(Self { epfd })
    }

    /// Adds `fd`; `token` comes back on every event for this descriptor.
    pub fn register(
        &self,
        fd: RawFd,
        token: u64,
        interest: Interest,
        trigger: TriggerMode,
        oneshot: bool,
    ) -> Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, interest, trigger, oneshot)
            .context("epoll add")
    }

    /// Replaces the interest set of an already-registered descriptor.
    /// One-shot descriptors must be rearmed this way after every event.
    pub fn rearm(
        &self,
        fd: RawFd,
        token: u64,
        interest: Interest,
        trigger: TriggerMode,
        oneshot: bool,
    ) -> Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, token, interest, trigger, oneshot)
            .context("epoll mod")
    }

    pub fn deregister(&self, fd: RawFd) -> Result<()> {
        let rc = unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        if rc < 0 {
            bail!("epoll del: {}", std::io::Error::last_os_error());
        }
        Ok(())
    }

    fn ctl(
        &self,
        op: libc::c_int,
        fd: RawFd,
        token: u64,
        interest: Interest,
        trigger: TriggerMode,
        oneshot: bool,
    ) -> Result<()> {
        let mut event = libc::epoll_event {
            events: event_flags(interest, trigger, oneshot),
            u64: token,
        };
        let rc = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut event) };
        if rc < 0 {
            bail!("{}", std::io::Error::last_os_error());
        }
        Ok(())
    }

    /// Blocks until at least one event arrives or the timeout elapses,
    /// filling `events`. A `None` timeout blocks indefinitely. An
    /// interrupted wait returns an empty batch so the caller can re-check
    /// its shutdown flag.
    pub fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> Result<()> {
        let millis = match timeout {
            Some(t) => t.as_millis().min(i32::MAX as u128) as i32,
            None => -1,
        };
        let rc = unsafe {
            libc::epoll_wait(
                self.epfd,
                events.buf.as_mut_ptr(),
                events.buf.len() as libc::c_int,
                millis,
            )
        };
        if rc >= 0 {
            events.len = rc as usize;
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            bail!("epoll_wait: {err}");
        }
        events.len = 0;
        Ok(())
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        unsafe { libc::close(self.epfd) };
    }
}

pub struct Events {
    buf: Box<[libc::epoll_event]>,
    len: usize,
}

impl Events {
    pub fn with_capacity(cap: usize) -> Self {
        let zero = libc::epoll_event { events: 0, u64: 0 };
        Self {
            buf: vec![zero; cap.max(1)].into_boxed_slice(),
            len: 0,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        // epoll_event is packed, so fields are copied out rather than
        // referenced.
        self.buf[..self.len].iter().map(|raw| Event {
            flags: raw.events,
            token: raw.u64,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Event {
    flags: u32,
    token: u64,
}

impl Event {
    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn readable(&self) -> bool {
        self.flags & libc::EPOLLIN as u32 != 0
    }

    pub fn writable(&self) -> bool {
        self.flags & libc::EPOLLOUT as u32 != 0
    }

    /// Peer hangup or descriptor error.
    pub fn closed(&self) -> bool {
        let bad = (libc::EPOLLRDHUP | libc::EPOLLHUP | libc::EPOLLERR) as u32;
        self.flags & bad != 0
    }
}

/// Wakes a blocked [`Poller::wait`] from another thread.
pub struct Waker {
    fd: RawFd,
}

impl Waker {
    pub fn new() -> Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            bail!("eventfd: {}", std::io::Error::last_os_error());
        }
        Ok(Self { fd })
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd
    }

    /// Makes the eventfd readable. Safe to call from any thread; the
    /// caller has nowhere to propagate a failure, so it is logged.
    pub fn wake(&self) {
        let one: u64 = 1;
        let rc = unsafe {
            libc::write(self.fd, (&raw const one).cast(), std::mem::size_of::<u64>())
        };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::WouldBlock {
                tracing::warn!(error = %err, "waker write failed");
            }
        }
    }

    /// Resets the eventfd counter after a wake-up was observed.
    pub fn drain(&self) {
        let mut count: u64 = 0;
        unsafe {
            libc::read(self.fd, (&raw mut count).cast(), std::mem::size_of::<u64>());
        }
    }
}

impl Drop for Waker {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waker_round_trip() {
        let poller = Poller::new().unwrap();
        let waker = Waker::new().unwrap();
        poller
            .register(waker.raw_fd(), 7, Interest::Readable, TriggerMode::Level, false)
            .unwrap();

        let mut events = Events::with_capacity(8);
        poller
            .wait(&mut events, Some(Duration::from_millis(10)))
            .unwrap();
        assert_eq!(events.iter().count(), 0);

        waker.wake();
        poller
            .wait(&mut events, Some(Duration::from_millis(100)))
            .unwrap();
        let hits: Vec<_> = events.iter().collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].token(), 7);
        assert!(hits[0].readable());

        waker.drain();
        poller
            .wait(&mut events, Some(Duration::from_millis(10)))
            .unwrap();
        assert_eq!(events.iter().count(), 0);
    }

    #[test]
    fn flag_composition() {
        let flags = event_flags(Interest::Writable, TriggerMode::Edge, true);
        assert!(flags & libc::EPOLLOUT as u32 != 0);
        assert!(flags & libc::EPOLLET as u32 != 0);
        assert!(flags & libc::EPOLLONESHOT as u32 != 0);
        assert!(flags & libc::EPOLLIN as u32 == 0);
    }
}
