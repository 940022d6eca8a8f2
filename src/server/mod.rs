//! Server engine: handler registration, acceptor re-arming, and stream
//! fan-out.

mod engine;
mod stream;
mod unary;

pub use engine::Server;
pub use stream::{StreamController, SubscriberId};
pub use unary::UnaryResponder;

use crate::tag::HandleId;

/// Work staged inside the engine mutex and executed after it is released.
/// User callbacks only ever run through one of these.
pub(crate) type StagedCallback = Box<dyn FnOnce() + Send>;

/// One server-side RPC handle in the engine's in-flight map. The worker
/// drives these after redeeming tags; implementations stage user callbacks
/// instead of invoking them, since every entrypoint runs under the engine
/// mutex.
pub(crate) trait ServerCall: Send {
    /// Produce and arm a fresh sibling handle so the runtime always has a
    /// pending acceptor for this method.
    fn clone_for_rearm(&self, id: HandleId) -> Box<dyn ServerCall>;

    /// A new call landed in this handle's acceptor.
    fn on_accepted(&mut self, id: HandleId) -> Option<StagedCallback>;

    /// One of this handle's writes completed.
    fn on_write_complete(&mut self, id: HandleId);

    /// The handle is being removed (terminal tag or failure flag).
    fn on_removed(&mut self, id: HandleId) -> Option<StagedCallback>;
}

#[cfg(test)]
#[path = "tests/server_tests.rs"]
mod server_tests;
