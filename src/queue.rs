//! Bounded FIFO of admissions waiting for a token.
//!
//! Entries are never reordered. Each one leaves exactly once: popped by [`WaitQueue::drain`], or
//! discarded by [`WaitQueue::purge`] when its caller has gone away.

use std::collections::VecDeque;
use tokio::time::Instant;

/// Returned by [`WaitQueue::enqueue`] when the queue is at capacity. Hands the rejected task back.
#[derive(Debug)]
pub struct QueueFull<T> {
    pub task: T,
    pub queued: usize,
    pub max: usize,
}

/// A queued task plus its arrival time.
#[derive(Debug)]
pub struct Pending<T> {
    pub task: T,
    pub enqueued_at: Instant,
}

#[derive(Debug)]
pub struct WaitQueue<T> {
    entries: VecDeque<Pending<T>>,
    max_len: usize,
}

impl<T> WaitQueue<T> {
    pub fn new(max_len: usize) -> Self {
        Self { entries: VecDeque::new(), max_len }
    }

    /// Append `task` unless the queue already holds `max_len` entries.
    pub fn enqueue(&mut self, task: T) -> Result<usize, QueueFull<T>> {
        if self.entries.len() >= self.max_len {
            return Err(QueueFull { task, queued: self.entries.len(), max: self.max_len });
        }
        self.entries.push_back(Pending { task, enqueued_at: Instant::now() });
        Ok(self.entries.len())
    }

    /// Pop up to `budget` entries from the front, oldest first.
    pub fn drain(&mut self, budget: usize) -> Vec<Pending<T>> {
        let n = budget.min(self.entries.len());
        self.entries.drain(..n).collect()
    }

    /// Drop every entry matching `dead`, preserving the order of the rest. Returns how many went.
    pub fn purge<F>(&mut self, mut dead: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|entry| !dead(&entry.task));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }
}
