//! Tests for the connectivity-to-connection-state mapping.

use super::state::{to_connection_state, ConnectionState};
use crate::runtime::Connectivity;

#[test]
fn test_shutdown_and_idle_map_to_not_connected() {
    assert_eq!(
        to_connection_state(Connectivity::Shutdown),
        ConnectionState::NotConnected
    );
    assert_eq!(
        to_connection_state(Connectivity::Idle),
        ConnectionState::NotConnected
    );
}

#[test]
fn test_connecting_and_transient_failure_map_to_attempting() {
    assert_eq!(
        to_connection_state(Connectivity::Connecting),
        ConnectionState::AttemptingToConnect
    );
    assert_eq!(
        to_connection_state(Connectivity::TransientFailure),
        ConnectionState::AttemptingToConnect
    );
}

#[test]
fn test_ready_maps_to_connected() {
    assert_eq!(
        to_connection_state(Connectivity::Ready),
        ConnectionState::Connected
    );
}

#[test]
fn test_display_strings() {
    assert_eq!(ConnectionState::NotConnected.to_string(), "not_connected");
    assert_eq!(
        ConnectionState::AttemptingToConnect.to_string(),
        "attempting_to_connect"
    );
    assert_eq!(ConnectionState::Connected.to_string(), "connected");
}
