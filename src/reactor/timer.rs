//! A timer heap ordered by absolute expiry, owned by exactly one
//! `Reactor`. Mirrors the teacher's preference for a small
//! purpose-built structure over pulling in a generic timer wheel
//! crate for something this narrow.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

pub type TimerId = u64;

struct Entry {
    deadline: Instant,
    id: TimerId,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Entry) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}
impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Entry) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Entry) -> Ordering {
        // `BinaryHeap` is a max-heap; we want the earliest deadline on
        // top, so invert the comparison.
        other.deadline.cmp(&self.deadline).then(other.id.cmp(&self.id))
    }
}

/// A min-heap of `(deadline, id)` pairs. The `Reactor` associates each
/// `id` with a callback in its own handler table; this structure only
/// tracks ordering, keeping it agnostic to what a "timer handler" is.
pub struct TimerHeap {
    heap: BinaryHeap<Entry>,
    next_id: TimerId,
}

impl TimerHeap {
    pub fn new() -> TimerHeap {
        TimerHeap {
            heap: BinaryHeap::new(),
            next_id: 1,
        }
    }

    /// Inserts a new timer at an absolute deadline, returning the id
    /// assigned to it (used to cancel it before it fires).
    pub fn insert(&mut self, deadline: Instant) -> TimerId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.heap.push(Entry { deadline, id });
        id
    }

    /// The earliest deadline currently scheduled, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.deadline)
    }

    /// Removes and returns every timer id whose deadline is at or
    /// before `now`.
    pub fn drain_expired(&mut self, now: Instant) -> Vec<TimerId> {
        let mut expired = Vec::new();
        while let Some(true) = self.heap.peek().map(|e| e.deadline <= now) {
            expired.push(self.heap.pop().unwrap().id);
        }
        expired
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn drains_in_deadline_order() {
        let mut heap = TimerHeap::new();
        let now = Instant::now();
        let far = heap.insert(now + Duration::from_secs(10));
        let near = heap.insert(now + Duration::from_millis(1));
        assert_eq!(heap.next_deadline(), Some(now + Duration::from_millis(1)));

        let expired = heap.drain_expired(now + Duration::from_secs(20));
        assert_eq!(expired, vec![near, far]);
        assert!(heap.is_empty());
    }

    #[test]
    fn drain_expired_leaves_future_timers() {
        let mut heap = TimerHeap::new();
        let now = Instant::now();
        heap.insert(now + Duration::from_secs(10));
        let expired = heap.drain_expired(now);
        assert!(expired.is_empty());
        assert_eq!(heap.len(), 1);
    }
}
