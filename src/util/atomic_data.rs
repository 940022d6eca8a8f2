//! A mutex-guarded value with condition-variable waiting.
//!
//! `AtomicData` is the single locking discipline used by the engines: every
//! mutation of in-flight maps, stream sets, channel slots, and connection
//! state happens inside a `use_safely` region. User callbacks are never
//! invoked from inside one.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Owns a value that can only be touched while holding the internal mutex.
///
/// ```
/// use rpcq::util::AtomicData;
///
/// let counter = AtomicData::new(0u32);
/// counter.use_safely(|n| *n += 1);
/// assert_eq!(counter.use_safely(|n| *n), 1);
/// ```
pub struct AtomicData<T> {
    data: Mutex<T>,
    condition: Condvar,
}

impl<T> AtomicData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data: Mutex::new(data),
            condition: Condvar::new(),
        }
    }

    /// Run `func` with exclusive access to the data.
    pub fn use_safely<R>(&self, func: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.lock();
        func(&mut guard)
    }

    /// Block until `predicate` holds, then run `func` with exclusive access.
    ///
    /// The predicate is re-checked after every `notify_one` / `notify_all`.
    pub fn wait_to_use_safely<R>(
        &self,
        predicate: impl Fn(&T) -> bool,
        func: impl FnOnce(&mut T) -> R,
    ) -> R {
        let mut guard = self.lock();
        while !predicate(&guard) {
            guard = self
                .condition
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
        func(&mut guard)
    }

    /// Wake one waiter blocked in `wait_to_use_safely`.
    pub fn notify_one(&self) {
        self.condition.notify_one();
    }

    /// Wake every waiter blocked in `wait_to_use_safely`.
    pub fn notify_all(&self) {
        self.condition.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, T> {
        // A panicked holder leaves the data intact for our access patterns;
        // recover rather than cascade the poison.
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Default> Default for AtomicData<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
