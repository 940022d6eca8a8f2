//! The single-consumer completion queue.

use crate::tag::Token;
use crate::util::BlockingQueue;
use std::sync::atomic::{AtomicBool, Ordering};

/// FIFO of completion events. The runtime pushes `(token, success)` pairs;
/// exactly one worker thread drains them with `next`.
pub struct CompletionQueue {
    // None is the shutdown pill; events queued before it still drain.
    events: BlockingQueue<Option<(Token, bool)>>,
    shut: AtomicBool,
}

impl CompletionQueue {
    pub fn new() -> Self {
        Self {
            events: BlockingQueue::new(),
            shut: AtomicBool::new(false),
        }
    }

    /// Deliver a completion event. Events pushed after `shutdown` are
    /// dropped.
    pub fn push(&self, token: Token, success: bool) {
        if !self.shut.load(Ordering::Acquire) {
            self.events.push_back(Some((token, success)));
        }
    }

    /// Blocking wait for the next event. Returns `None` once the queue has
    /// been shut down and every earlier event has been consumed.
    pub fn next(&self) -> Option<(Token, bool)> {
        match self.events.pop_front() {
            Some(event) => Some(event),
            None => {
                // Keep the pill queued so the queue stays terminal for any
                // later drain.
                self.events.push_back(None);
                None
            }
        }
    }

    /// Stop accepting events and release the consumer after the backlog
    /// drains. Idempotent.
    pub fn shutdown(&self) {
        if !self.shut.swap(true, Ordering::AcqRel) {
            self.events.push_back(None);
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut.load(Ordering::Acquire)
    }
}

impl Default for CompletionQueue {
    fn default() -> Self {
        Self::new()
    }
}
