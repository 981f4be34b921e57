//! Worker pool: a fixed set of OS threads blocking on the shared
//! [`WorkQueue`]. Workers record completions and wake the event loop,
//! which owns all epoll re-arming.

use crate::auth::CredentialStore;
use crate::config::Discipline;
use crate::http::SiteContext;
use crate::http::connection::ConnStatus;
use crate::server::dispatch::{Completions, Direction, WorkItem};
use crate::server::poll::Waker;
use crate::sync::WorkQueue;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;

/// Everything a worker thread needs, cloned per thread.
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: Arc<WorkQueue<WorkItem>>,
    pub completions: Arc<Completions>,
    pub waker: Arc<Waker>,
    pub discipline: Discipline,
    pub site: Arc<SiteContext>,
    pub creds: Arc<CredentialStore>,
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `count` named worker threads over the shared queue.
    pub fn spawn(count: usize, ctx: WorkerContext) -> Result<Self> {
        let mut handles = Vec::with_capacity(count);
        for id in 0..count {
            let ctx = ctx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("worker-{id}"))
                .spawn(move || worker_loop(id, ctx))
                .with_context(|| format!("spawn worker {id}"))?;
            handles.push(handle);
        }
        Ok(Self { handles })
    }

    /// Waits for every worker to exit. Workers exit when the queue is
    /// closed and drained.
    pub fn join(self) {
        for handle in self.handles {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }
    }
}

fn worker_loop(id: usize, ctx: WorkerContext) {
    tracing::debug!(worker = id, "worker started");
    while let Some(item) = ctx.queue.pop() {
        run_item(&ctx, &item);
        item.slot.leave_step();
        item.slot.work_done.store(true, Ordering::Release);
        ctx.completions.push(item.token, Arc::clone(&item.slot));
        ctx.waker.wake();
    }
    tracing::debug!(worker = id, "worker stopped");
}

fn run_item(ctx: &WorkerContext, item: &WorkItem) {
    let mut conn = item.slot.conn.lock().unwrap_or_else(|e| e.into_inner());
    match (ctx.discipline, item.direction) {
        (Discipline::Reactor, Direction::Read) => {
            if conn.read_from_socket() {
                conn.process(&ctx.site, &ctx.creds);
            } else {
                item.slot.failed.store(true, Ordering::Release);
            }
        }
        (Discipline::Reactor, Direction::Write) => {
            conn.write_to_socket();
            if conn.status() == ConnStatus::Closing {
                item.slot.failed.store(true, Ordering::Release);
            }
        }
        (Discipline::Proactor, Direction::Read) => {
            // The event loop already read; only the processing is ours.
            conn.process(&ctx.site, &ctx.creds);
        }
        (Discipline::Proactor, Direction::Write) => {
            // Writes never reach the pool under the proactor discipline.
        }
    }
}
