//! Client engine tests: connection-state sequences, hosted unary calls, and
//! teardown invariants.
//!
//! Tests that listen on loopback addresses share the process-wide wire, so
//! they run serially; each uses its own port.

use super::{Client, ConnectionState};
use crate::method::UnaryMethod;
use crate::server::Server;
use crate::status::{Status, StatusCode};
use crate::util::BlockingQueue;
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;

const ECHO: UnaryMethod<String, String> = UnaryMethod::new("test.Echo");

fn echo_server(address: &str) -> Server {
    let mut server = Server::bind(address);
    server
        .register_unary(&ECHO, |request, responder| responder.finish(&request))
        .expect("registration happens before start");
    server.start().expect("the test address should be free");
    server
}

fn track_states(client: &mut Client, address: &str) -> Arc<BlockingQueue<ConnectionState>> {
    let states = Arc::new(BlockingQueue::new());
    let sink = states.clone();
    client.change_server(address, move |state| sink.push_back(state));
    states
}

/// A locally hosted server may be observed either as a direct jump to
/// `Connected` or with an `AttemptingToConnect` step first.
fn expect_connects(states: &BlockingQueue<ConnectionState>) {
    match states.pop_front() {
        ConnectionState::Connected => {}
        ConnectionState::AttemptingToConnect => {
            assert_eq!(states.pop_front(), ConnectionState::Connected);
        }
        ConnectionState::NotConnected => panic!("client reported not_connected while connecting"),
    }
}

#[test]
fn test_initial_state_is_not_connected() {
    let client = Client::new();
    assert_eq!(client.get_state(), ConnectionState::NotConnected);
    assert_eq!(client.get_server_address(), "");
    assert!(!client.is_using_in_process_server());
}

#[test]
#[serial]
fn test_no_server() {
    let mut client = Client::new();
    let states = track_states(&mut client, "127.0.0.1:50060");

    assert_eq!(states.pop_front(), ConnectionState::AttemptingToConnect);
    client.kill();
    assert_eq!(states.pop_front(), ConnectionState::NotConnected);
    assert!(states.is_empty());
    assert_eq!(client.outstanding_tags(), 0);
}

#[test]
#[serial]
fn test_kill_while_attempting_emits_nothing_further() {
    let mut client = Client::new();
    let states = track_states(&mut client, "127.0.0.1:50061");

    assert_eq!(states.pop_front(), ConnectionState::AttemptingToConnect);
    client.kill();
    assert_eq!(states.pop_front(), ConnectionState::NotConnected);

    // Already disconnected, so a second teardown has nothing to report.
    client.kill();
    std::thread::sleep(Duration::from_millis(20));
    assert!(states.is_empty());
}

#[test]
#[serial]
fn test_delayed_server_full_state_sequence() {
    let address = "127.0.0.1:50062";
    let mut client = Client::new();
    let states = track_states(&mut client, address);

    assert_eq!(states.pop_front(), ConnectionState::AttemptingToConnect);

    {
        let mut server = echo_server(address);
        assert_eq!(states.pop_front(), ConnectionState::Connected);
        server.shutdown_and_wait();
    }

    assert_eq!(states.pop_front(), ConnectionState::NotConnected);
    assert_eq!(states.pop_front(), ConnectionState::AttemptingToConnect);

    client.kill();
    assert_eq!(states.pop_front(), ConnectionState::NotConnected);
    assert!(states.is_empty());
}

#[test]
#[serial]
fn test_already_running_server() {
    let address = "127.0.0.1:50063";
    let _server = echo_server(address);

    let mut client = Client::new();
    let states = track_states(&mut client, address);
    expect_connects(&states);
    assert_eq!(client.get_state(), ConnectionState::Connected);

    client.kill();
    assert_eq!(states.pop_front(), ConnectionState::NotConnected);
    assert!(states.is_empty());
}

#[test]
#[serial]
fn test_change_server_to_the_same_address_reconnects_once() {
    let address = "127.0.0.1:50064";
    let _server = echo_server(address);

    let mut client = Client::new();
    let first = track_states(&mut client, address);
    expect_connects(&first);

    let second = track_states(&mut client, address);
    expect_connects(&second);
    assert_eq!(client.get_state(), ConnectionState::Connected);

    // Exactly one connected session: no further transitions on either
    // callback until teardown.
    std::thread::sleep(Duration::from_millis(20));
    assert!(second.is_empty());
}

#[test]
#[serial]
fn test_unary_echo_via_start_unary() {
    let address = "127.0.0.1:50065";
    let _server = echo_server(address);

    let mut client = Client::new();
    let states = track_states(&mut client, address);
    expect_connects(&states);

    let results = Arc::new(BlockingQueue::new());
    let sink = results.clone();
    client.start_unary(&ECHO, &"hello".to_string(), move |status, response| {
        sink.push_back((status, response));
    });

    let (status, response) = results.pop_front();
    assert!(status.is_ok(), "unexpected status: {status}");
    assert_eq!(response.as_deref(), Some("hello"));
    assert_eq!(client.in_flight_rpcs(), 0);
}

#[test]
#[serial]
fn test_unary_echo_via_stub() {
    let address = "127.0.0.1:50066";
    let _server = echo_server(address);

    let mut client = Client::new();
    let states = track_states(&mut client, address);
    expect_connects(&states);

    let reply = client
        .use_stub(|stub| stub.call(&ECHO, &"roundtrip".to_string()))
        .expect("the channel is connected")
        .expect("the echo handler returns ok");
    assert_eq!(reply, "roundtrip");
}

#[test]
#[serial]
fn test_use_stub_is_skipped_while_disconnected() {
    let mut client = Client::new();
    let states = track_states(&mut client, "127.0.0.1:50067");
    assert_eq!(states.pop_front(), ConnectionState::AttemptingToConnect);

    let invoked = client.use_stub(|_| true);
    assert_eq!(invoked, None);
}

#[test]
fn test_start_unary_without_a_channel_fails_immediately() {
    let client = Client::new();
    let results = Arc::new(BlockingQueue::new());
    let sink = results.clone();
    client.start_unary(&ECHO, &"hello".to_string(), move |status, response| {
        sink.push_back((status, response));
    });

    let (status, response) = results.pop_front();
    assert_eq!(status.code, StatusCode::Unavailable);
    assert!(response.is_none());
}

#[test]
fn test_in_process_channel() {
    let mut server = Server::bind("");
    server
        .register_unary(&ECHO, |request, responder| responder.finish(&request))
        .expect("registration happens before start");
    server.start().expect("in-process servers always start");

    let mut client = Client::new();
    client.connect_in_process(&server);
    assert_eq!(client.get_state(), ConnectionState::Connected);
    assert!(client.is_using_in_process_server());
    assert_eq!(client.get_server_address(), "in-process");

    let reply = client
        .use_stub(|stub| stub.call(&ECHO, &"local".to_string()))
        .expect("in-process channels are always connected")
        .expect("the echo handler returns ok");
    assert_eq!(reply, "local");

    client.kill();
    assert_eq!(client.get_state(), ConnectionState::NotConnected);
    assert_eq!(client.outstanding_tags(), 0);
}

#[test]
#[serial]
fn test_kill_with_an_outstanding_unary_fires_the_callback_exactly_once() {
    let address = "127.0.0.1:50068";
    let mut server = Server::bind(address);
    server
        .register_unary(&ECHO, |request, responder: crate::server::UnaryResponder<String>| {
            std::thread::sleep(Duration::from_millis(100));
            responder.finish(&request);
        })
        .expect("registration happens before start");
    server.start().expect("the test address should be free");

    let mut client = Client::new();
    let states = track_states(&mut client, address);
    expect_connects(&states);

    let results = Arc::new(BlockingQueue::new());
    let sink = results.clone();
    client.start_unary(&ECHO, &"slow".to_string(), move |status, _| {
        sink.push_back(status);
    });
    client.kill();

    let status: Status = results.pop_front();
    assert!(
        status.is_ok() || status.code == StatusCode::Cancelled,
        "unexpected terminal status: {status}"
    );
    std::thread::sleep(Duration::from_millis(150));
    assert!(results.is_empty(), "terminal callback fired more than once");
    assert_eq!(client.in_flight_rpcs(), 0);
    assert_eq!(client.outstanding_tags(), 0);
}
