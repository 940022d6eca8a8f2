//! A monitor-protected FIFO.
//!
//! Backs the completion queue and serializes control-plane messages; the
//! tests also use it to collect callback sequences without sleeping.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Thread-safe queue. `pop_front` blocks until a value is available.
pub struct BlockingQueue<T> {
    queue: Mutex<VecDeque<T>>,
    condition: Condvar,
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            condition: Condvar::new(),
        }
    }

    pub fn push_back(&self, value: T) {
        self.lock().push_back(value);
        self.condition.notify_one();
    }

    /// Remove and return the oldest value, blocking while the queue is empty.
    pub fn pop_front(&self) -> T {
        let mut guard = self.lock();
        loop {
            if let Some(value) = guard.pop_front() {
                return value;
            }
            guard = self
                .condition
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Discard everything but the newest value and return a copy of it,
    /// blocking while the queue is empty. The newest value stays queued.
    pub fn pop_all_but_most_recent(&self) -> T
    where
        T: Clone,
    {
        let mut guard = self.lock();
        loop {
            if !guard.is_empty() {
                while guard.len() > 1 {
                    guard.pop_front();
                }
                // len == 1, so front() is present
                if let Some(value) = guard.front() {
                    return value.clone();
                }
            }
            guard = self
                .condition
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
