//! Idle-connection expiry registry.
//!
//! A doubly linked list kept in ascending expiry order, with the records
//! stored in a slab arena and linked by slot index instead of by pointer.
//! The event loop owns the registry outright: `sweep` hands back the tokens
//! of expired connections and the loop performs the teardown itself.
//!
//! Expiry times only ever move later, which keeps `adjust` cheap: the
//! record is unlinked and re-inserted scanning from its old successor, not
//! from the head.

use slab::Slab;
use std::time::Instant;

/// Stable reference to a registered record. Valid until the record is
/// removed or swept; each connection holds at most one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle(usize);

struct Record {
    expire: Instant,
    token: usize,
    prev: Option<usize>,
    next: Option<usize>,
}

pub struct TimerList {
    records: Slab<Record>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl TimerList {
    pub fn new() -> Self {
        Self {
            records: Slab::new(),
            head: None,
            tail: None,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Registers an expiry for `token`, keeping the list sorted.
    pub fn add(&mut self, token: usize, expire: Instant) -> TimerHandle {
        let key = self.records.insert(Record {
            expire,
            token,
            prev: None,
            next: None,
        });
        let head = self.head;
        self.link_from(key, head);
        TimerHandle(key)
    }

    /// Moves a record's expiry later. Scans for the new position from the
    /// record's current successor, so extending the earliest records stays
    /// cheap.
    pub fn adjust(&mut self, handle: TimerHandle, expire: Instant) {
        let key = handle.0;
        let next = self.records[key].next;
        // Still in order relative to the successor: update in place.
        if next.is_none_or(|n| expire < self.records[n].expire) {
            self.records[key].expire = expire;
            return;
        }
        self.unlink(key);
        self.records[key].expire = expire;
        self.link_from(key, next);
    }

    pub fn remove(&mut self, handle: TimerHandle) {
        self.unlink(handle.0);
        self.records.remove(handle.0);
    }

    /// Removes every record with `expire <= now` and returns their tokens
    /// in expiry order. Stops at the first live record.
    pub fn sweep(&mut self, now: Instant) -> Vec<usize> {
        let mut expired = Vec::new();
        while let Some(key) = self.head {
            if self.records[key].expire > now {
                break;
            }
            expired.push(self.records[key].token);
            self.unlink(key);
            self.records.remove(key);
        }
        expired
    }

    pub fn next_expiry(&self) -> Option<Instant> {
        self.head.map(|key| self.records[key].expire)
    }

    /// Inserts `key` at its sorted position, scanning forward from `start`.
    fn link_from(&mut self, key: usize, start: Option<usize>) {
        let expire = self.records[key].expire;
        let mut cursor = start;
        while let Some(c) = cursor {
            if self.records[c].expire > expire {
                break;
            }
            cursor = self.records[c].next;
        }
        match cursor {
            Some(c) => {
                let prev = self.records[c].prev;
                self.records[key].next = Some(c);
                self.records[key].prev = prev;
                self.records[c].prev = Some(key);
                match prev {
                    Some(p) => self.records[p].next = Some(key),
                    None => self.head = Some(key),
                }
            }
            None => {
                let tail = self.tail;
                self.records[key].prev = tail;
                self.records[key].next = None;
                match tail {
                    Some(t) => self.records[t].next = Some(key),
                    None => self.head = Some(key),
                }
                self.tail = Some(key);
            }
        }
    }

    fn unlink(&mut self, key: usize) {
        let (prev, next) = {
            let record = &self.records[key];
            (record.prev, record.next)
        };
        match prev {
            Some(p) => self.records[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.records[n].prev = prev,
            None => self.tail = prev,
        }
        self.records[key].prev = None;
        self.records[key].next = None;
    }
}

impl Default for TimerList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn expiries(list: &TimerList) -> Vec<Instant> {
        let mut out = Vec::new();
        let mut cursor = list.head;
        while let Some(key) = cursor {
            out.push(list.records[key].expire);
            cursor = list.records[key].next;
        }
        out
    }

    fn assert_sorted(list: &TimerList) {
        let expiries = expiries(list);
        assert!(expiries.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(expiries.len(), list.len());
        // Tail agrees with forward traversal.
        match expiries.last() {
            Some(_) => {
                let tail = list.tail.unwrap();
                assert_eq!(list.records[tail].next, None);
            }
            None => assert_eq!(list.tail, None),
        }
    }

    #[test]
    fn add_keeps_ascending_order() {
        let base = Instant::now();
        let mut list = TimerList::new();
        list.add(1, base + Duration::from_secs(30));
        list.add(2, base + Duration::from_secs(10));
        list.add(3, base + Duration::from_secs(20));
        list.add(4, base + Duration::from_secs(5));
        assert_sorted(&list);
        assert_eq!(list.next_expiry(), Some(base + Duration::from_secs(5)));
    }

    #[test]
    fn adjust_moves_record_later() {
        let base = Instant::now();
        let mut list = TimerList::new();
        let first = list.add(1, base + Duration::from_secs(10));
        list.add(2, base + Duration::from_secs(20));
        list.add(3, base + Duration::from_secs(30));

        list.adjust(first, base + Duration::from_secs(25));
        assert_sorted(&list);
        assert_eq!(list.next_expiry(), Some(base + Duration::from_secs(20)));

        // Adjusting the tail later leaves order intact.
        list.adjust(first, base + Duration::from_secs(40));
        assert_sorted(&list);
    }

    #[test]
    fn adjust_in_place_when_still_sorted() {
        let base = Instant::now();
        let mut list = TimerList::new();
        let handle = list.add(1, base + Duration::from_secs(10));
        list.add(2, base + Duration::from_secs(60));
        list.adjust(handle, base + Duration::from_secs(15));
        assert_sorted(&list);
        assert_eq!(list.next_expiry(), Some(base + Duration::from_secs(15)));
    }

    #[test]
    fn remove_handles_head_tail_and_interior() {
        let base = Instant::now();
        let mut list = TimerList::new();
        let a = list.add(1, base + Duration::from_secs(10));
        let b = list.add(2, base + Duration::from_secs(20));
        let c = list.add(3, base + Duration::from_secs(30));

        list.remove(b);
        assert_sorted(&list);
        list.remove(a);
        assert_sorted(&list);
        list.remove(c);
        assert_sorted(&list);
        assert!(list.is_empty());
    }

    #[test]
    fn sweep_removes_exactly_the_expired_set() {
        let base = Instant::now();
        let mut list = TimerList::new();
        list.add(1, base + Duration::from_secs(10));
        list.add(2, base + Duration::from_secs(20));
        list.add(3, base + Duration::from_secs(30));

        let expired = list.sweep(base + Duration::from_secs(20));
        assert_eq!(expired, vec![1, 2]);
        assert_eq!(list.len(), 1);
        assert_sorted(&list);

        assert!(list.sweep(base + Duration::from_secs(20)).is_empty());
        assert_eq!(list.sweep(base + Duration::from_secs(30)), vec![3]);
        assert!(list.is_empty());
    }
}
