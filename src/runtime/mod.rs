//! The runtime adapter surface.
//!
//! The engines never talk to a transport directly; they drive these
//! object-safe traits with byte payloads and completion tokens. The crate
//! ships one binding, the in-memory loopback runtime in [`memory`], and a
//! real transport plugs in through the same seam.

pub mod memory;

mod completion_queue;

pub use completion_queue::CompletionQueue;

use crate::status::Status;
use crate::tag::Token;
use std::sync::Arc;
use std::time::Duration;

#[cfg(test)]
#[path = "tests/memory_tests.rs"]
mod memory_tests;

/// Raw connectivity as reported by the transport. The client engine folds
/// this into the three-valued application model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Idle,
    Connecting,
    Ready,
    TransientFailure,
    Shutdown,
}

/// Factory for channels and server transports.
pub trait Runtime: Send + Sync {
    /// Create a channel targeting `address`. The channel starts idle; a
    /// connection attempt is kicked off by `state(true)`.
    fn channel(&self, address: &str) -> Arc<dyn ChannelTransport>;

    /// Create a server transport bound to `address`. An empty address
    /// serves in-process channels only.
    fn server(&self, address: &str) -> Arc<dyn ServerTransport>;
}

/// Client side of a connection.
pub trait ChannelTransport: Send + Sync {
    /// Current connectivity. With `try_to_connect`, an idle or failed channel
    /// also kicks off a (re)connection attempt; the resulting transition is
    /// reported asynchronously through any armed state watcher.
    fn state(&self, try_to_connect: bool) -> Connectivity;

    /// Deliver `(token, true)` on `queue` once connectivity differs from
    /// `observed`, or `(token, false)` when `deadline` expires first.
    /// At most one watcher is armed per channel.
    fn notify_on_state_change(
        &self,
        observed: Connectivity,
        deadline: Duration,
        queue: &Arc<CompletionQueue>,
        token: Token,
    );

    /// Start an asynchronous unary call. `(token, true)` is delivered on
    /// `queue` once the result is available through the returned receiver.
    fn unary(
        &self,
        method: &str,
        request: Vec<u8>,
        queue: &Arc<CompletionQueue>,
        token: Token,
    ) -> Arc<dyn UnaryReceiver>;

    /// Blocking unary call; the synchronous stub path.
    fn call_blocking(&self, method: &str, request: Vec<u8>) -> Result<Vec<u8>, Status>;

    /// Start a server-streaming call read through a blocking receiver.
    fn server_stream(&self, method: &str, request: Vec<u8>) -> Arc<dyn StreamReceiver>;

    /// Tear the channel down. In-flight unary calls complete with
    /// `Cancelled`, active streams terminate, and an armed state watcher
    /// fires one final time.
    fn close(&self);
}

/// Result slot of an asynchronous unary call.
pub trait UnaryReceiver: Send + Sync {
    /// Take the completed result. Only meaningful after the call's token has
    /// been delivered.
    fn take(&self) -> (Status, Vec<u8>);
}

/// Client end of a server-streaming call. Read from a dedicated thread; the
/// read is blocking by design.
pub trait StreamReceiver: Send + Sync {
    /// Next update, or `None` once the stream has terminated.
    fn read(&self) -> Option<Vec<u8>>;

    /// Cancel the stream. Pending and future reads drain to `None`.
    fn cancel(&self);

    /// Terminal status. Meaningful once `read` has returned `None`.
    fn status(&self) -> Status;
}

/// Server side of a transport.
pub trait ServerTransport: Send + Sync {
    /// Publish the listening address and begin accepting calls.
    fn start(&self) -> Result<(), Status>;

    /// Arm an acceptor for the next incoming unary call to `method`.
    /// `(token, true)` is delivered when a call lands in the acceptor;
    /// `(token, false)` when the server shuts down first.
    fn request_unary(
        &self,
        method: &str,
        queue: &Arc<CompletionQueue>,
        token: Token,
    ) -> Arc<dyn UnaryAcceptor>;

    /// Arm an acceptor for the next incoming server-streaming call.
    fn request_server_stream(
        &self,
        method: &str,
        queue: &Arc<CompletionQueue>,
        token: Token,
    ) -> Arc<dyn StreamAcceptor>;

    /// Stop accepting calls. With a deadline the shutdown is deferred;
    /// without one it happens now. Armed acceptors fail, active streams
    /// terminate with `Unavailable`, and connected channels observe the
    /// disappearance.
    fn shutdown(&self, deadline: Option<Duration>);

    /// A channel connected to this server over a local memory transport.
    fn in_process_channel(&self) -> Arc<dyn ChannelTransport>;
}

/// Holds one accepted unary call.
pub trait UnaryAcceptor: Send + Sync {
    /// The accepted request and its finisher. `None` until the acceptor's
    /// token has been delivered with the success flag.
    fn take_call(&self) -> Option<(Vec<u8>, Arc<dyn UnaryFinisher>)>;
}

/// Completes one accepted unary call.
pub trait UnaryFinisher: Send + Sync {
    /// Send the response and deliver `token` on the server queue.
    fn finish(&self, response: Vec<u8>, status: Status, token: Token);

    /// Fail the call without a response payload.
    fn finish_with_error(&self, status: Status, token: Token);
}

/// Holds one accepted server-streaming call.
pub trait StreamAcceptor: Send + Sync {
    fn take_call(&self) -> Option<(Vec<u8>, Arc<dyn StreamWriter>)>;
}

/// Writes updates to one stream subscriber.
pub trait StreamWriter: Send + Sync {
    /// Queue one update. `token` is delivered with the success flag, or with
    /// the failure flag if the subscriber is gone.
    fn write(&self, message: Vec<u8>, token: Token);

    /// Terminate the stream with `status`; `token` is delivered on the
    /// server queue.
    fn finish(&self, status: Status, token: Token);

    /// Deliver `token` once when the call ends for any reason (client
    /// cancellation, finish, or server shutdown).
    fn notify_on_done(&self, token: Token);
}
