//! Small concurrency primitives shared by the client and server engines.

pub mod atomic_data;
pub mod blocking_queue;

pub use atomic_data::AtomicData;
pub use blocking_queue::BlockingQueue;

#[cfg(test)]
#[path = "tests/atomic_data_tests.rs"]
mod atomic_data_tests;

#[cfg(test)]
#[path = "tests/blocking_queue_tests.rs"]
mod blocking_queue_tests;
