use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex},
};

/// Bounded-by-upstream-backpressure FIFO of work items, guarded by a mutex
/// and condition variable (not a lock-free ring — the worker pool's queue
/// is not the hot contended path the arena is, and blocking semantics are
/// exactly what `pop` needs: a worker with nothing to do should sleep, not
/// spin).
///
/// There is no separate capacity limit: in multi-threaded dispatch mode a
/// caller can only enqueue what it first allocated a slot for from the
/// [`Arena`](crate::Arena), so the queue is naturally capped at the arena's
/// slot count.
pub struct WorkQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
}

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner { items: VecDeque::new(), closed: false }), not_empty: Condvar::new() }
    }

    /// Enqueues one item and wakes a single waiting consumer.
    pub fn push(&self, item: T) {
        let mut inner = self.inner.lock().unwrap();
        inner.items.push_back(item);
        drop(inner);
        self.not_empty.notify_one();
    }

    /// Blocks until an item is available or the queue is closed.
    /// Returns `None` once closed and drained — the signal for a worker to
    /// exit its loop.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            inner = self.not_empty.wait(inner).unwrap();
        }
    }

    /// Signals shutdown: every blocked and future `pop` call drains
    /// remaining items, then returns `None`. Does not itself free queued
    /// items — callers drain and dispose of them (returning any arena
    /// slots) before dropping the queue.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        drop(inner);
        self.not_empty.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
