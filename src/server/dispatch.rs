//! Dispatch disciplines. Reactor hands raw readiness to a worker, which
//! performs both the socket I/O and the processing; proactor does the I/O
//! on the event-loop thread and workers only run the parse/respond step.

use crate::http::connection::{ConnStatus, Connection};
use crate::sync::{PushError, WorkQueue};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// Shared per-connection cell. The event loop keeps one `Arc` in its
/// table; in-flight work items hold another, so a torn-down connection
/// stays alive until the worker is done with it.
pub struct ConnSlot {
    pub conn: Mutex<Connection>,
    /// Set by the worker when its step finished; cleared before enqueue.
    pub work_done: AtomicBool,
    /// Set when the step decided the connection is dead.
    pub failed: AtomicBool,
    in_flight: AtomicU32,
}

impl ConnSlot {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            work_done: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            in_flight: AtomicU32::new(0),
        }
    }

    /// Counts a work item from enqueue until the worker finishes with it;
    /// returns the depth including the new item.
    fn enter_step(&self) -> u32 {
        self.in_flight.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn leave_step(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Tracks the deepest queued-plus-executing item count any single
/// connection has reached. One-shot registration with completion-driven
/// re-arming holds this at one; anything higher is a dispatch bug.
#[derive(Default)]
pub struct InFlightGauge {
    peak: AtomicU32,
}

impl InFlightGauge {
    fn record(&self, depth: u32) {
        self.peak.fetch_max(depth, Ordering::AcqRel);
    }

    pub fn peak(&self) -> u32 {
        self.peak.load(Ordering::Acquire)
    }
}

pub struct WorkItem {
    pub token: usize,
    pub slot: Arc<ConnSlot>,
    pub direction: Direction,
}

/// Tokens whose worker step has finished, drained by the event loop
/// after each wake-up.
#[derive(Default)]
pub struct Completions {
    list: Mutex<Vec<(usize, Arc<ConnSlot>)>>,
}

impl Completions {
    pub fn push(&self, token: usize, slot: Arc<ConnSlot>) {
        self.list
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((token, slot));
    }

    pub fn drain(&self) -> Vec<(usize, Arc<ConnSlot>)> {
        std::mem::take(&mut *self.list.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

/// What the event loop must do with the descriptor after dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Followup {
    /// Nothing yet; a completion will decide.
    None,
    RearmRead,
    RearmWrite,
    Teardown,
}

pub trait Dispatch: Send + Sync {
    fn handle_readable(&self, token: usize, slot: &Arc<ConnSlot>) -> Followup;
    fn handle_writable(&self, token: usize, slot: &Arc<ConnSlot>) -> Followup;
}

pub struct ReactorDispatch {
    queue: Arc<WorkQueue<WorkItem>>,
    gauge: Arc<InFlightGauge>,
}

impl ReactorDispatch {
    pub fn new(queue: Arc<WorkQueue<WorkItem>>, gauge: Arc<InFlightGauge>) -> Self {
        Self { queue, gauge }
    }

    fn enqueue(&self, token: usize, slot: &Arc<ConnSlot>, direction: Direction) -> Followup {
        slot.work_done.store(false, Ordering::Release);
        slot.failed.store(false, Ordering::Release);
        self.gauge.record(slot.enter_step());
        let item = WorkItem {
            token,
            slot: Arc::clone(slot),
            direction,
        };
        match self.queue.push(item) {
            Ok(()) => Followup::None,
            Err(PushError::Full(item)) => {
                slot.leave_step();
                // The socket is untouched, so the kernel re-reports this
                // readiness after the re-arm; the idle timer bounds how
                // long the deferral can repeat.
                tracing::warn!(token, "work queue full, deferring event");
                match item.direction {
                    Direction::Read => Followup::RearmRead,
                    Direction::Write => Followup::RearmWrite,
                }
            }
            Err(PushError::Closed(_)) => {
                slot.leave_step();
                Followup::Teardown
            }
        }
    }
}

impl Dispatch for ReactorDispatch {
    fn handle_readable(&self, token: usize, slot: &Arc<ConnSlot>) -> Followup {
        self.enqueue(token, slot, Direction::Read)
    }

    fn handle_writable(&self, token: usize, slot: &Arc<ConnSlot>) -> Followup {
        self.enqueue(token, slot, Direction::Write)
    }
}

pub struct ProactorDispatch {
    queue: Arc<WorkQueue<WorkItem>>,
    gauge: Arc<InFlightGauge>,
}

impl ProactorDispatch {
    pub fn new(queue: Arc<WorkQueue<WorkItem>>, gauge: Arc<InFlightGauge>) -> Self {
        Self { queue, gauge }
    }
}

impl Dispatch for ProactorDispatch {
    fn handle_readable(&self, token: usize, slot: &Arc<ConnSlot>) -> Followup {
        {
            let mut conn = slot.conn.lock().unwrap_or_else(|e| e.into_inner());
            if !conn.read_from_socket() {
                return Followup::Teardown;
            }
        }
        slot.work_done.store(false, Ordering::Release);
        slot.failed.store(false, Ordering::Release);
        self.gauge.record(slot.enter_step());
        let item = WorkItem {
            token,
            slot: Arc::clone(slot),
            direction: Direction::Read,
        };
        match self.queue.push(item) {
            Ok(()) => Followup::None,
            Err(PushError::Full(_)) => {
                slot.leave_step();
                // Unlike the reactor path, the bytes are already consumed
                // here, so the kernel has nothing left to re-report: the
                // buffered request sits until the client sends more or the
                // idle timer reclaims the connection.
                tracing::warn!(token, "work queue full, dropping completed read");
                Followup::RearmRead
            }
            Err(PushError::Closed(_)) => {
                slot.leave_step();
                Followup::Teardown
            }
        }
    }

    fn handle_writable(&self, _token: usize, slot: &Arc<ConnSlot>) -> Followup {
        let mut conn = slot.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.write_to_socket();
        match conn.status() {
            ConnStatus::AwaitRead => Followup::RearmRead,
            ConnStatus::AwaitWrite => Followup::RearmWrite,
            ConnStatus::Closing => Followup::Teardown,
        }
    }
}
