//! The process-wide wire: address registry for loopback servers.
//!
//! Channels that target an address with no listener yet enroll as waiters;
//! when a server claims the address they are connected and their state
//! watchers fire, which is how "no server, then server" sequences play out
//! without a network.

use super::channel::ChannelCore;
use super::server::ServerCore;
use crate::status::{Status, StatusCode};
use crate::util::AtomicData;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

#[derive(Default)]
struct WireState {
    servers: HashMap<String, Arc<ServerCore>>,
    waiting: HashMap<String, Vec<Weak<ChannelCore>>>,
}

static WIRE: OnceLock<AtomicData<WireState>> = OnceLock::new();

fn wire() -> &'static AtomicData<WireState> {
    WIRE.get_or_init(AtomicData::default)
}

/// Claim `address` for `server` and connect every channel waiting on it.
pub(super) fn register_server(address: &str, server: &Arc<ServerCore>) -> Result<(), Status> {
    let waiting = wire().use_safely(|w| {
        if w.servers.contains_key(address) {
            return Err(Status::new(
                StatusCode::Unavailable,
                format!("address already in use: {address}"),
            ));
        }
        w.servers.insert(address.to_string(), server.clone());
        Ok(w.waiting.remove(address).unwrap_or_default())
    })?;

    for channel in waiting.iter().filter_map(Weak::upgrade) {
        channel.server_appeared(server);
    }
    Ok(())
}

/// Release `address`, but only if `server` is the one holding it.
pub(super) fn unregister_server(address: &str, server: &Arc<ServerCore>) {
    wire().use_safely(|w| {
        if w.servers
            .get(address)
            .is_some_and(|held| Arc::ptr_eq(held, server))
        {
            w.servers.remove(address);
        }
    });
}

/// Listening server for `address`, if any.
pub(super) fn lookup(address: &str) -> Option<Arc<ServerCore>> {
    wire().use_safely(|w| w.servers.get(address).cloned())
}

/// Like [`lookup`], but enroll `channel` as a waiter when no server is
/// listening, so it is notified the moment one appears.
pub(super) fn lookup_or_enroll(
    address: &str,
    channel: &Arc<ChannelCore>,
) -> Option<Arc<ServerCore>> {
    wire().use_safely(|w| {
        if let Some(server) = w.servers.get(address) {
            Some(server.clone())
        } else {
            let waiters = w.waiting.entry(address.to_string()).or_default();
            waiters.retain(|weak| weak.strong_count() > 0);
            waiters.push(Arc::downgrade(channel));
            None
        }
    })
}
