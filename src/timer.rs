//! Pending-timer queue with synchronous cancellation.
//!
//! Deadlines live in clock-elapsed milliseconds. A `BinaryHeap` of reversed
//! keys gives earliest-first ordering with FIFO tie-breaking; the live map
//! is the source of truth and stale heap entries are dropped lazily, so a
//! cancelled timer can never fire. Ids are never reused, which lets holders
//! treat them as generation counters: keep the id of the timer you armed
//! and ignore any fire that does not match it.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

/// Handle to one scheduled timer, unique for the queue's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// What a fired timer drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerTask {
    /// Periodic check that force-eliminates beats nobody pressed for.
    MissCheck,
    /// Dispatch pass of the bar scheduler at this index.
    Dispatch { scheduler: usize },
}

struct HeapKey {
    deadline_ms: f64,
    seq: u64,
}

impl PartialEq for HeapKey {
    fn eq(&self, other: &Self) -> bool {
        self.deadline_ms.to_bits() == other.deadline_ms.to_bits() && self.seq == other.seq
    }
}

impl Eq for HeapKey {}

impl PartialOrd for HeapKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed so the max-heap pops the earliest deadline, oldest first
        self.deadline_ms
            .total_cmp(&other.deadline_ms)
            .then_with(|| self.seq.cmp(&other.seq))
            .reverse()
    }
}

/// Earliest-deadline-first queue of pending timers carrying payload `T`.
pub struct TimerQueue<T> {
    heap: BinaryHeap<HeapKey>,
    live: HashMap<u64, (f64, T)>,
    next_seq: u64,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self { heap: BinaryHeap::new(), live: HashMap::new(), next_seq: 0 }
    }

    /// Arm a timer at an absolute clock deadline.
    pub fn schedule(&mut self, deadline_ms: f64, payload: T) -> TimerId {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.live.insert(seq, (deadline_ms, payload));
        self.heap.push(HeapKey { deadline_ms, seq });
        TimerId(seq)
    }

    /// Disarm a pending timer. Returns false when the id already fired or
    /// was cancelled, which callers treat as a no-op.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.live.remove(&id.0).is_some()
    }

    /// Deadline of a still-pending timer.
    pub fn deadline_of(&self, id: TimerId) -> Option<f64> {
        self.live.get(&id.0).map(|(deadline_ms, _)| *deadline_ms)
    }

    /// Earliest pending deadline, if any timer is armed.
    pub fn next_deadline_ms(&mut self) -> Option<f64> {
        self.drop_stale();
        self.heap.peek().map(|key| key.deadline_ms)
    }

    /// Pop the earliest timer due at or before `now_ms`. Ties pop in
    /// scheduling order.
    pub fn pop_due(&mut self, now_ms: f64) -> Option<(TimerId, T)> {
        loop {
            let (deadline_ms, seq) = {
                let key = self.heap.peek()?;
                (key.deadline_ms, key.seq)
            };
            if !self.live.contains_key(&seq) {
                self.heap.pop();
                continue;
            }
            if deadline_ms > now_ms {
                return None;
            }
            self.heap.pop();
            if let Some((_, payload)) = self.live.remove(&seq) {
                return Some((TimerId(seq), payload));
            }
        }
    }

    fn drop_stale(&mut self) {
        while let Some(key) = self.heap.peek() {
            if self.live.contains_key(&key.seq) {
                break;
            }
            self.heap.pop();
        }
    }

    /// Drop every pending timer. Already-issued ids all become stale.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.live.clear();
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}
