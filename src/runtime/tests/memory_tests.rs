//! Tests for the completion queue and the in-memory runtime binding.

use super::memory::{MemoryRuntime, ServerCore};
use super::{CompletionQueue, Connectivity, Runtime, ServerTransport};
use crate::codec;
use crate::status::StatusCode;
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_completion_queue_drains_before_the_shutdown_pill() {
    let queue = CompletionQueue::new();
    queue.push(1, true);
    queue.push(2, false);
    queue.shutdown();
    assert_eq!(queue.next(), Some((1, true)));
    assert_eq!(queue.next(), Some((2, false)));
    assert_eq!(queue.next(), None);
}

#[test]
fn test_completion_queue_drops_events_after_shutdown() {
    let queue = CompletionQueue::new();
    queue.shutdown();
    queue.push(1, true);
    assert_eq!(queue.next(), None);
    assert!(queue.is_shut_down());
}

#[test]
fn test_completion_queue_shutdown_is_idempotent() {
    let queue = CompletionQueue::new();
    queue.shutdown();
    queue.shutdown();
    assert_eq!(queue.next(), None);
}

#[test]
#[serial]
fn test_channel_observes_a_server_appearing_and_disappearing() {
    let address = "127.0.0.1:51011";
    let queue = Arc::new(CompletionQueue::new());
    let channel = MemoryRuntime.channel(address);

    // The first query returns the current state and kicks a connect attempt.
    assert_eq!(channel.state(false), Connectivity::Idle);
    assert_eq!(channel.state(true), Connectivity::Idle);
    assert_eq!(channel.state(false), Connectivity::Connecting);

    channel.notify_on_state_change(Connectivity::Connecting, Duration::from_secs(60), &queue, 1);

    let server = ServerCore::new(address);
    server.start().expect("address should be free");
    assert_eq!(queue.next(), Some((1, true)));
    assert_eq!(channel.state(false), Connectivity::Ready);

    channel.notify_on_state_change(Connectivity::Ready, Duration::from_secs(60), &queue, 2);
    server.shutdown(None);
    assert_eq!(queue.next(), Some((2, true)));
    assert_eq!(channel.state(false), Connectivity::Idle);

    channel.close();
}

#[test]
fn test_watcher_deadline_expiry_delivers_the_failure_flag() {
    let queue = Arc::new(CompletionQueue::new());
    let channel = MemoryRuntime.channel("127.0.0.1:51012");

    let _ = channel.state(true);
    assert_eq!(channel.state(false), Connectivity::Connecting);
    channel.notify_on_state_change(
        Connectivity::Connecting,
        Duration::from_millis(30),
        &queue,
        7,
    );
    assert_eq!(queue.next(), Some((7, false)));
    channel.close();
}

#[test]
fn test_mismatched_watcher_fires_immediately() {
    let queue = Arc::new(CompletionQueue::new());
    let channel = MemoryRuntime.channel("127.0.0.1:51013");

    // Observed state is already stale when arming.
    channel.notify_on_state_change(Connectivity::Ready, Duration::from_secs(60), &queue, 3);
    assert_eq!(queue.next(), Some((3, true)));
    channel.close();
}

#[test]
fn test_unknown_method_completes_with_unimplemented() {
    let server = ServerCore::new("");
    server.start().expect("in-process server should start");
    let channel = server.in_process_channel();

    let request = codec::encode(&"ping".to_string()).expect("request should encode");
    let error = channel
        .call_blocking("missing.Method", request)
        .expect_err("the method is not registered");
    assert_eq!(error.code, StatusCode::Unimplemented);
}

#[test]
fn test_calls_after_server_shutdown_are_unavailable() {
    let server = ServerCore::new("");
    server.start().expect("in-process server should start");
    let channel = server.in_process_channel();
    server.shutdown(None);

    let request = codec::encode(&"ping".to_string()).expect("request should encode");
    let error = channel
        .call_blocking("missing.Method", request)
        .expect_err("the server is gone");
    assert_eq!(error.code, StatusCode::Unavailable);
}

#[test]
fn test_closed_channel_fails_calls_with_cancelled() {
    let channel = MemoryRuntime.channel("127.0.0.1:51014");
    channel.close();
    let error = channel
        .call_blocking("any.Method", Vec::new())
        .expect_err("the channel is closed");
    assert_eq!(error.code, StatusCode::Cancelled);
}
