//! Engine-level errors.
//!
//! These cover programmer misuse and setup failures only. RPC outcomes,
//! including transport failures, are reported as [`Status`](crate::Status)
//! values through each RPC's own callback.

use thiserror::Error;

/// Errors returned by engine methods.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `register_*` was called after the server engine was started.
    #[error("handlers must be registered before the server is started")]
    AlreadyStarted,

    /// Another server is already listening on the requested address.
    #[error("address already in use: {0}")]
    AddressInUse(String),

    /// The server was asked to start twice.
    #[error("server is already running")]
    AlreadyRunning,

    /// A message could not be encoded for transport.
    #[error("message encoding failed: {0}")]
    Encode(String),
}
