use std::cmp::Ordering;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};

use crate::scheduler::job::Job;

/// Heap entry ordered so the `BinaryHeap` max is the most urgent job:
/// lowest priority, then earliest run time, then earliest insertion.
#[derive(Debug)]
struct Entry {
    seq: u64,
    job: Job,
}

impl Entry {
    fn key(&self) -> (i32, DateTime<Utc>, u64) {
        (self.job.priority, self.job.run_time, self.seq)
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

/// Jobs waiting for their run time, ordered by `(priority, run_time)`.
///
/// Not internally synchronized: the node shares it as
/// `Arc<Mutex<ReadyQueue>>` so every call below is one critical section.
/// Use [`pop_if_due`](Self::pop_if_due) rather than `peek` + `pop` when
/// promoting, so the head cannot change between the check and the removal.
#[derive(Debug, Default)]
pub struct ReadyQueue {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, job: Job) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry { seq, job });
    }

    pub fn peek(&self) -> Option<&Job> {
        self.heap.peek().map(|e| &e.job)
    }

    pub fn pop(&mut self) -> Option<Job> {
        self.heap.pop().map(|e| e.job)
    }

    /// Remove the head only if its run time is at or before `now`.
    pub fn pop_if_due(&mut self, now: DateTime<Utc>) -> Option<Job> {
        if self.heap.peek()?.job.run_time <= now {
            self.pop()
        } else {
            None
        }
    }

    /// Pop due jobs in order until the head is not yet due.
    ///
    /// A not-yet-due head blocks due jobs of lower urgency behind it until
    /// its own run time arrives.
    pub fn drain_due(&mut self, now: DateTime<Utc>) -> Vec<Job> {
        let mut due = Vec::new();
        while let Some(job) = self.pop_if_due(now) {
            due.push(job);
        }
        due
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
