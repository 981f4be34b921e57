use std::collections::VecDeque;
use std::sync::Mutex;

use crate::sync::Semaphore;

/// Why a push was refused.
#[derive(Debug, PartialEq, Eq)]
pub enum PushError<T> {
    /// The queue is at capacity. The event loop logs and drops; a
    /// level-triggered descriptor will report readiness again.
    Full(T),
    /// The queue has been closed for shutdown.
    Closed(T),
}

/// Fixed-capacity multi-producer multi-consumer work queue.
///
/// `push` never blocks: the event-loop thread must stay responsive, so a
/// full queue is reported to the caller instead of applying backpressure.
/// `pop` blocks on the item semaphore until work arrives or the queue is
/// closed and drained.
pub struct WorkQueue<T> {
    inner: Mutex<Inner<T>>,
    items: Semaphore,
    capacity: usize,
}

struct Inner<T> {
    buf: VecDeque<T>,
    closed: bool,
}

impl<T> WorkQueue<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buf: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            items: Semaphore::new(0),
            capacity,
        }
    }

    pub fn push(&self, item: T) -> Result<(), PushError<T>> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.closed {
            return Err(PushError::Closed(item));
        }
        if inner.buf.len() == self.capacity {
            return Err(PushError::Full(item));
        }
        inner.buf.push_back(item);
        drop(inner);
        self.items.release();
        Ok(())
    }

    /// Blocks until an item is available. Returns `None` once the queue is
    /// closed and empty.
    pub fn pop(&self) -> Option<T> {
        loop {
            self.items.acquire();
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(item) = inner.buf.pop_front() {
                return Some(item);
            }
            if inner.closed {
                drop(inner);
                // Pass the wakeup on so every blocked consumer drains out.
                self.items.release();
                return None;
            }
        }
    }

    /// Closes the queue. Blocked consumers wake and observe `None` after
    /// the remaining items are drained.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.closed = true;
        drop(inner);
        self.items.release();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_order() {
        let queue = WorkQueue::with_capacity(4);
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        queue.push(3).unwrap();
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
    }

    #[test]
    fn push_fails_when_full() {
        let queue = WorkQueue::with_capacity(1);
        queue.push(1).unwrap();
        assert_eq!(queue.push(2), Err(PushError::Full(2)));
    }

    #[test]
    fn close_wakes_all_consumers() {
        let queue = Arc::new(WorkQueue::<u32>::with_capacity(4));
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || queue.pop())
            })
            .collect();
        queue.close();
        for consumer in consumers {
            assert_eq!(consumer.join().unwrap(), None);
        }
    }

    #[test]
    fn remaining_items_drain_after_close() {
        let queue = WorkQueue::with_capacity(4);
        queue.push(7).unwrap();
        queue.close();
        assert_eq!(queue.push(8), Err(PushError::Closed(8)));
        assert_eq!(queue.pop(), Some(7));
        assert_eq!(queue.pop(), None);
    }
}
