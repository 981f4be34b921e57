//! The event loop: one thread owning epoll, the connection table, and the
//! timer registry. Connection descriptors are registered one-shot, so a
//! descriptor is silent while a step for it is in flight and is rearmed
//! exactly once afterwards.

pub mod dispatch;
pub mod listener;
pub mod poll;
pub mod pool;
pub mod signal;

use crate::auth::CredentialStore;
use crate::config::{Config, Discipline, TriggerMode};
use crate::http::SiteContext;
use crate::http::connection::{ConnStatus, Connection};
use crate::http::response;
use crate::sync::WorkQueue;
use crate::timer::{TimerHandle, TimerList};
use anyhow::{Context, Result};
use self::dispatch::{
    Completions, Direction, Dispatch, Followup, InFlightGauge, ProactorDispatch, ReactorDispatch,
    WorkItem,
};
use self::poll::{Events, Interest, Poller, Waker};
use self::pool::{WorkerContext, WorkerPool};
use slab::Slab;
use std::io::{ErrorKind, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

const LISTENER_TOKEN: u64 = u64::MAX;
const WAKER_TOKEN: u64 = u64::MAX - 1;
const EVENT_BATCH: usize = 1024;
/// A connection expires after this many quiet timeslots.
const EXPIRE_SLOTS: u32 = 3;

/// Event-loop bookkeeping for one live connection.
struct SlotEntry {
    fd: RawFd,
    slot: Arc<dispatch::ConnSlot>,
    timer: TimerHandle,
}

/// Requests a graceful stop from another thread or a signal handler.
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.waker.wake();
    }

    pub(crate) fn waker_fd(&self) -> RawFd {
        self.waker.raw_fd()
    }
}

pub struct Server {
    cfg: Config,
    listener: TcpListener,
    local_addr: SocketAddr,
    poller: Poller,
    waker: Arc<Waker>,
    conns: Slab<SlotEntry>,
    timers: TimerList,
    queue: Arc<WorkQueue<WorkItem>>,
    completions: Arc<Completions>,
    dispatch: Box<dyn Dispatch>,
    gauge: Arc<InFlightGauge>,
    pool: Option<WorkerPool>,
    tick: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
}

impl Server {
    /// Binds the listener, sets up epoll, and spawns the worker pool. The
    /// server is idle until [`run`](Self::run).
    pub fn new(cfg: Config, creds: Arc<CredentialStore>) -> Result<Self> {
        let addr: SocketAddr = cfg
            .listen_addr()
            .parse()
            .with_context(|| format!("invalid listen address {}", cfg.listen_addr()))?;
        let listener = listener::bind(addr, cfg.linger)?;
        let local_addr = listener.local_addr().context("listener local_addr")?;

        let poller = Poller::new()?;
        poller.register(
            listener.as_raw_fd(),
            LISTENER_TOKEN,
            Interest::Readable,
            cfg.listener_trigger,
            false,
        )?;
        let waker = Arc::new(Waker::new()?);
        poller.register(
            waker.raw_fd(),
            WAKER_TOKEN,
            Interest::Readable,
            TriggerMode::Level,
            false,
        )?;

        let queue = Arc::new(WorkQueue::with_capacity(cfg.queue_capacity));
        let completions = Arc::new(Completions::default());
        let gauge = Arc::new(InFlightGauge::default());
        let dispatch: Box<dyn Dispatch> = match cfg.discipline {
            Discipline::Reactor => {
                Box::new(ReactorDispatch::new(Arc::clone(&queue), Arc::clone(&gauge)))
            }
            Discipline::Proactor => {
                Box::new(ProactorDispatch::new(Arc::clone(&queue), Arc::clone(&gauge)))
            }
        };

        let site = Arc::new(SiteContext::from_config(&cfg));
        let pool = WorkerPool::spawn(
            cfg.workers,
            WorkerContext {
                queue: Arc::clone(&queue),
                completions: Arc::clone(&completions),
                waker: Arc::clone(&waker),
                discipline: cfg.discipline,
                site,
                creds,
            },
        )?;

        Ok(Self {
            cfg,
            listener,
            local_addr,
            poller,
            waker,
            conns: Slab::new(),
            timers: TimerList::new(),
            queue,
            completions,
            dispatch,
            gauge,
            pool: Some(pool),
            tick: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The bound address, useful when the configured port was `0`.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The per-connection work-item depth gauge; its peak stays at one
    /// while the one-shot re-arm discipline holds.
    pub fn in_flight_gauge(&self) -> Arc<InFlightGauge> {
        Arc::clone(&self.gauge)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: Arc::clone(&self.shutdown),
            waker: Arc::clone(&self.waker),
        }
    }

    /// Runs the event loop until a shutdown is requested, then drains the
    /// worker pool and returns.
    pub fn run(&mut self) -> Result<()> {
        tracing::info!(
            addr = %self.local_addr,
            workers = self.cfg.workers,
            discipline = ?self.cfg.discipline,
            "server running"
        );
        let ticker_stop = Arc::new((Mutex::new(false), Condvar::new()));
        let ticker = self.spawn_ticker(Arc::clone(&ticker_stop))?;

        let mut events = Events::with_capacity(EVENT_BATCH);
        loop {
            self.poller.wait(&mut events, None)?;
            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => self.accept_ready(),
                    WAKER_TOKEN => self.waker.drain(),
                    token => {
                        let token = token as usize;
                        if event.closed() {
                            self.close_conn(token, true);
                        } else if event.readable() {
                            self.on_ready(token, Direction::Read);
                        } else if event.writable() {
                            self.on_ready(token, Direction::Write);
                        }
                    }
                }
            }
            self.drain_completions();
            if self.tick.swap(false, Ordering::AcqRel) {
                self.sweep_expired();
            }
            if self.shutdown.load(Ordering::SeqCst) || signal::SHUTDOWN.load(Ordering::SeqCst) {
                break;
            }
        }

        tracing::info!(open_connections = self.conns.len(), "shutting down");
        {
            let (lock, cvar) = &*ticker_stop;
            *lock.lock().unwrap_or_else(|e| e.into_inner()) = true;
            cvar.notify_all();
        }
        if ticker.join().is_err() {
            tracing::error!("ticker thread panicked");
        }
        self.queue.close();
        if let Some(pool) = self.pool.take() {
            pool.join();
        }
        Ok(())
    }

    /// Spawns the thread that flags a timer sweep once per timeslot. The
    /// stop pair wakes it promptly at shutdown.
    fn spawn_ticker(
        &self,
        stop: Arc<(Mutex<bool>, Condvar)>,
    ) -> Result<JoinHandle<()>> {
        let tick = Arc::clone(&self.tick);
        let waker = Arc::clone(&self.waker);
        let slot_len = self.cfg.timeslot();
        std::thread::Builder::new()
            .name("ticker".to_string())
            .spawn(move || {
                let (lock, cvar) = &*stop;
                let mut stopped = lock.lock().unwrap_or_else(|e| e.into_inner());
                loop {
                    let (guard, timeout) = cvar
                        .wait_timeout(stopped, slot_len)
                        .unwrap_or_else(|e| e.into_inner());
                    stopped = guard;
                    if *stopped {
                        return;
                    }
                    if timeout.timed_out() {
                        tick.store(true, Ordering::Release);
                        waker.wake();
                    }
                }
            })
            .context("spawn ticker")
    }

    // One accept per event under level triggering, drain under edge.
    fn accept_ready(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    self.admit(stream, peer);
                    if self.cfg.listener_trigger == TriggerMode::Level {
                        return;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    return;
                }
            }
        }
    }

    fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        if stream.set_nonblocking(true).is_err() {
            return;
        }
        if self.conns.len() >= self.cfg.max_connections {
            tracing::warn!(%peer, "connection table full, refusing");
            let mut stream = stream;
            let _ = stream.write(response::BUSY_RESPONSE);
            return;
        }
        let fd = stream.as_raw_fd();
        let conn = Connection::new(stream, peer, self.cfg.conn_trigger, self.cfg.read_buffer);

        let entry = self.conns.vacant_entry();
        let token = entry.key();
        let timer = self
            .timers
            .add(token, Instant::now() + self.cfg.timeslot() * EXPIRE_SLOTS);
        entry.insert(SlotEntry {
            fd,
            slot: Arc::new(dispatch::ConnSlot::new(conn)),
            timer,
        });

        if let Err(e) = self.poller.register(
            fd,
            token as u64,
            Interest::Readable,
            self.cfg.conn_trigger,
            true,
        ) {
            tracing::warn!(%peer, error = %e, "register failed");
            let entry = self.conns.remove(token);
            self.timers.remove(entry.timer);
            return;
        }
        tracing::debug!(%peer, token, "accepted");
    }

    fn on_ready(&mut self, token: usize, direction: Direction) {
        let Some(entry) = self.conns.get(token) else {
            return;
        };
        self.timers
            .adjust(entry.timer, Instant::now() + self.cfg.timeslot() * EXPIRE_SLOTS);
        let slot = Arc::clone(&entry.slot);
        let followup = match direction {
            Direction::Read => self.dispatch.handle_readable(token, &slot),
            Direction::Write => self.dispatch.handle_writable(token, &slot),
        };
        self.apply_followup(token, followup);
    }

    fn apply_followup(&mut self, token: usize, followup: Followup) {
        let rearmed = match followup {
            Followup::None => true,
            Followup::RearmRead => self.rearm(token, Interest::Readable),
            Followup::RearmWrite => self.rearm(token, Interest::Writable),
            Followup::Teardown => {
                self.close_conn(token, true);
                true
            }
        };
        if !rearmed {
            self.close_conn(token, true);
        }
    }

    fn rearm(&self, token: usize, interest: Interest) -> bool {
        let Some(entry) = self.conns.get(token) else {
            return true;
        };
        match self
            .poller
            .rearm(entry.fd, token as u64, interest, self.cfg.conn_trigger, true)
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(token, error = %e, "rearm failed");
                false
            }
        }
    }

    // The connection's post-step status picks the next interest.
    fn drain_completions(&mut self) {
        for (token, slot) in self.completions.drain() {
            let stale = match self.conns.get(token) {
                Some(entry) => !Arc::ptr_eq(&entry.slot, &slot),
                None => true,
            };
            // The token was torn down (and possibly reused) while the
            // worker held the old slot.
            if stale || !slot.work_done.load(Ordering::Acquire) {
                continue;
            }
            if slot.failed.swap(false, Ordering::AcqRel) {
                self.close_conn(token, true);
                continue;
            }
            let status = slot.conn.lock().unwrap_or_else(|e| e.into_inner()).status();
            let followup = match status {
                ConnStatus::AwaitRead => Followup::RearmRead,
                ConnStatus::AwaitWrite => Followup::RearmWrite,
                ConnStatus::Closing => Followup::Teardown,
            };
            self.apply_followup(token, followup);
        }
    }

    fn sweep_expired(&mut self) {
        let expired = self.timers.sweep(Instant::now());
        for token in expired {
            tracing::info!(token, "idle connection expired");
            // The sweep already dropped the timer record.
            self.close_conn(token, false);
        }
    }

    /// Removes a connection from the table and from epoll. The socket
    /// itself closes when the last `Arc` to its slot drops, which may be
    /// on a worker thread still finishing a stale step.
    fn close_conn(&mut self, token: usize, remove_timer: bool) {
        let Some(entry) = self.conns.try_remove(token) else {
            return;
        };
        if let Err(e) = self.poller.deregister(entry.fd) {
            tracing::debug!(token, error = %e, "deregister failed");
        }
        if remove_timer {
            self.timers.remove(entry.timer);
        }
        tracing::debug!(token, "connection closed");
    }
}
