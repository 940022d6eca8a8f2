//! Client engine: channel ownership, connection-state tracking, hosted
//! unary calls, and stream subscriptions that survive server changes.

mod engine;
mod state;
mod stream;
mod unary;

pub use engine::{Client, ClientConfig, Stub};
pub use state::ConnectionState;
pub use stream::StreamId;

#[cfg(test)]
#[path = "tests/state_tests.rs"]
mod state_tests;

#[cfg(test)]
#[path = "tests/client_tests.rs"]
mod client_tests;
