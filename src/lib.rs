//! Ergonomic asynchronous RPC over a completion-queue runtime.
//!
//! The underlying runtime exposes a single FIFO of opaque completion events
//! keyed by caller-supplied tokens; any token whose owning object has been
//! freed is a use-after-free. This crate owns that hazard so applications
//! don't have to: it mints stable tokens, reconstructs typed operations when
//! they come back, keeps every in-flight RPC alive for exactly the interval
//! its tokens may still arrive, re-arms server acceptors so calls are
//! continuously accepted, fans stream writes out to subscribers in order,
//! and folds raw channel connectivity into a three-valued connection state.
//!
//! ```
//! use rpcq::{Client, Server, UnaryMethod};
//!
//! const ECHO: UnaryMethod<String, String> = UnaryMethod::new("demo.Echo");
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = Server::bind("");
//! server.register_unary(&ECHO, |request, responder| responder.finish(&request))?;
//! server.start()?;
//!
//! let mut client = Client::new();
//! client.connect_in_process(&server);
//! let reply = client
//!     .use_stub(|stub| stub.call(&ECHO, &"hello".to_string()))
//!     .expect("in-process channels are always connected")?;
//! assert_eq!(reply, "hello");
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod error;
pub mod method;
pub mod runtime;
pub mod server;
pub mod status;
pub mod tag;
pub mod util;

pub use client::{Client, ClientConfig, ConnectionState, StreamId, Stub};
pub use codec::Message;
pub use error::EngineError;
pub use method::{ServerStreamMethod, UnaryMethod};
pub use server::{Server, StreamController, SubscriberId, UnaryResponder};
pub use status::{Status, StatusCode};
