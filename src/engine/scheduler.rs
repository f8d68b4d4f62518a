//! Deferred action queue
//!
//! Actions are kept in a min-heap keyed by due time, with an insertion
//! sequence number breaking ties so equal deadlines pop in scheduling order.
//! Nothing here sleeps: the runtime asks for the next deadline and pops what
//! is due, which keeps the queue testable with synthetic instants.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use crate::coordinates::Point;

/// Identifies every action that came from one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlanId(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub enum ActionKind {
    Tap {
        character: char,
        point: Point,
        duration: Duration,
    },
    Inject {
        text: String,
    },
}

#[derive(Debug, Clone)]
pub struct ScheduledAction {
    pub due: Instant,
    pub plan: PlanId,
    pub kind: ActionKind,
    seq: u64,
}

impl PartialEq for ScheduledAction {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for ScheduledAction {}

impl PartialOrd for ScheduledAction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledAction {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due.cmp(&other.due).then(self.seq.cmp(&other.seq))
    }
}

#[derive(Debug, Default)]
pub struct ActionScheduler {
    heap: BinaryHeap<Reverse<ScheduledAction>>,
    next_seq: u64,
}

impl ActionScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, plan: PlanId, due: Instant, kind: ActionKind) {
        self.next_seq += 1;
        self.heap.push(Reverse(ScheduledAction {
            due,
            plan,
            kind,
            seq: self.next_seq,
        }));
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(action)| action.due)
    }

    /// Remove and return every action due at or before `now`, in order
    pub fn pop_due(&mut self, now: Instant) -> Vec<ScheduledAction> {
        let mut due = Vec::new();
        while let Some(Reverse(next)) = self.heap.peek() {
            if next.due > now {
                break;
            }
            if let Some(Reverse(action)) = self.heap.pop() {
                due.push(action);
            }
        }
        due
    }

    /// Drop the pending actions of one plan; returns how many were dropped
    pub fn cancel_plan(&mut self, plan: PlanId) -> usize {
        let before = self.heap.len();
        self.heap.retain(|Reverse(action)| action.plan != plan);
        before - self.heap.len()
    }

    /// Drop everything; returns how many were dropped
    pub fn cancel_all(&mut self) -> usize {
        let count = self.heap.len();
        self.heap.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
