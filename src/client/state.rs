//! The three-valued connection state shown to applications.

use crate::runtime::Connectivity;
use std::fmt;

/// Application-level view of the channel, folded down from the runtime's
/// five connectivity states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    NotConnected,
    AttemptingToConnect,
    Connected,
}

pub(crate) fn to_connection_state(connectivity: Connectivity) -> ConnectionState {
    match connectivity {
        Connectivity::Shutdown | Connectivity::Idle => ConnectionState::NotConnected,
        Connectivity::Connecting | Connectivity::TransientFailure => {
            ConnectionState::AttemptingToConnect
        }
        Connectivity::Ready => ConnectionState::Connected,
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::NotConnected => "not_connected",
            ConnectionState::AttemptingToConnect => "attempting_to_connect",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}
