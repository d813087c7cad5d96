//! Timer heap for operation deadlines.
//!
//! Parked operations with a finite deadline arm an entry here. Entries hold
//! the wait cell weakly: an operation that resolves or is dropped before
//! its deadline leaves a dead entry behind, pruned lazily when the heap is
//! inspected. Firing a timer delivers `TimedOut` through the cell with the
//! tag the operation chose.

use crate::error::ErrorKind;
use crate::time::Time;
use crate::wait::{WaitCell, WeakWaitCell};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tracing::trace;

#[derive(Debug)]
struct TimerEntry {
    deadline: Time,
    seq: u64,
    cell: WeakWaitCell,
    tag: usize,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for a min-heap; earlier armed wins ties.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of armed deadlines.
#[derive(Debug, Default)]
pub(crate) struct TimerHeap {
    heap: BinaryHeap<TimerEntry>,
    next_seq: u64,
}

impl TimerHeap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Arms a timer that fires `TimedOut` with `tag` into `cell` at
    /// `deadline`.
    pub(crate) fn arm(&mut self, deadline: Time, cell: &WaitCell, tag: usize) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(TimerEntry {
            deadline,
            seq,
            cell: cell.downgrade(),
            tag,
        });
    }

    /// Earliest deadline still worth waiting for.
    ///
    /// Entries whose operation already resolved or dropped are discarded on
    /// the way.
    pub(crate) fn next_deadline(&mut self) -> Option<Time> {
        while let Some(entry) = self.heap.peek() {
            let live = entry.cell.upgrade().is_some_and(|cell| !cell.is_spent());
            if live {
                return Some(entry.deadline);
            }
            self.heap.pop();
        }
        None
    }

    /// Fires every timer due at `now`; returns how many waits it resolved.
    pub(crate) fn fire_due(&mut self, now: Time) -> usize {
        let mut fired = 0;
        while let Some(entry) = self.heap.peek() {
            if entry.deadline > now {
                break;
            }
            let Some(entry) = self.heap.pop() else {
                break;
            };
            if let Some(cell) = entry.cell.upgrade() {
                if cell.fire(entry.tag, Err(ErrorKind::TimedOut), None) {
                    trace!(deadline = %entry.deadline, tag = entry.tag, "timer fired");
                    fired += 1;
                }
            }
        }
        fired
    }
}
