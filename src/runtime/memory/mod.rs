//! In-memory loopback runtime.
//!
//! Emulates a completion-queue transport over process-local memory:
//!
//! - a process-wide wire registry maps listening addresses to server cores,
//!   so servers can appear and disappear while channels watch them;
//! - channels walk the real connectivity states (idle, connecting, ready)
//!   and deliver watcher events exactly like a channel-backed runtime;
//! - state-watchdog deadlines expire through a shared sweeper thread;
//! - in-process channels connect straight to a server core, bypassing the
//!   wire.
//!
//! Everything crosses the boundary as opaque bytes and tokens; the engines
//! cannot tell this runtime from a networked one.

mod calls;
mod channel;
mod server;
mod timer;
mod wire;

pub(crate) use server::ServerCore;

use super::{ChannelTransport, Runtime, ServerTransport};
use std::sync::Arc;

/// The loopback runtime binding.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryRuntime;

impl Runtime for MemoryRuntime {
    fn channel(&self, address: &str) -> Arc<dyn ChannelTransport> {
        channel::ChannelCore::remote(address)
    }

    fn server(&self, address: &str) -> Arc<dyn ServerTransport> {
        ServerCore::new(address)
    }
}
