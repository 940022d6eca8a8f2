//! Shared deadline sweeper.
//!
//! One background thread serves every scheduled deadline in the process:
//! watcher expirations and deferred server shutdowns. Actions run off the
//! sweeper's own thread with no lock held.

use std::sync::{Arc, Condvar, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

struct Entry {
    due: Instant,
    action: Box<dyn FnOnce() + Send>,
}

struct Sweeper {
    entries: Mutex<Vec<Entry>>,
    condition: Condvar,
}

static SWEEPER: OnceLock<Arc<Sweeper>> = OnceLock::new();

/// Run `action` once `after` has elapsed.
pub(super) fn schedule(after: Duration, action: impl FnOnce() + Send + 'static) {
    let sweeper = SWEEPER.get_or_init(|| {
        let sweeper = Arc::new(Sweeper {
            entries: Mutex::new(Vec::new()),
            condition: Condvar::new(),
        });
        let worker = sweeper.clone();
        std::thread::Builder::new()
            .name("rpcq-deadline-sweeper".into())
            .spawn(move || worker.run())
            .expect("failed to spawn the deadline sweeper thread");
        sweeper
    });

    sweeper
        .entries
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(Entry {
            due: Instant::now() + after,
            action: Box::new(action),
        });
    sweeper.condition.notify_one();
}

impl Sweeper {
    fn run(&self) {
        loop {
            let due_action = {
                let mut guard = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
                loop {
                    let now = Instant::now();
                    let earliest = guard
                        .iter()
                        .enumerate()
                        .min_by_key(|(_, entry)| entry.due)
                        .map(|(index, entry)| (index, entry.due));
                    match earliest {
                        Some((index, due)) if due <= now => {
                            break guard.swap_remove(index).action;
                        }
                        Some((_, due)) => {
                            guard = self
                                .condition
                                .wait_timeout(guard, due - now)
                                .unwrap_or_else(PoisonError::into_inner)
                                .0;
                        }
                        None => {
                            guard = self
                                .condition
                                .wait(guard)
                                .unwrap_or_else(PoisonError::into_inner);
                        }
                    }
                }
            };
            due_action();
        }
    }
}
