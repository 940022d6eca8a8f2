//! Loopback channel with connectivity emulation.
//!
//! The contract matches a channel-backed runtime: `state(true)` returns the
//! current connectivity and kicks off a connection attempt as a side effect;
//! the resulting transition is observed through the armed state watcher, not
//! through the return value.

use super::calls::{StreamCallCore, UnaryCallCore};
use super::server::ServerCore;
use super::{timer, wire};
use crate::runtime::{ChannelTransport, CompletionQueue, Connectivity, StreamReceiver, UnaryReceiver};
use crate::status::Status;
use crate::tag::Token;
use crate::util::AtomicData;
use std::sync::{Arc, Weak};
use std::time::Duration;

struct Watcher {
    observed: Connectivity,
    queue: Arc<CompletionQueue>,
    token: Token,
    generation: u64,
}

struct ChannelData {
    connectivity: Connectivity,
    server: Option<Arc<ServerCore>>,
    watcher: Option<Watcher>,
    watcher_generation: u64,
    enrolled: bool,
    closed: bool,
    in_process: bool,
    unary_calls: Vec<Weak<UnaryCallCore>>,
    stream_calls: Vec<Weak<StreamCallCore>>,
}

pub(crate) struct ChannelCore {
    target: String,
    self_weak: Weak<ChannelCore>,
    data: AtomicData<ChannelData>,
}

impl ChannelCore {
    pub(crate) fn remote(target: &str) -> Arc<Self> {
        Self::build(target.to_string(), Connectivity::Idle, None, false)
    }

    pub(crate) fn in_process(server: Arc<ServerCore>) -> Arc<Self> {
        Self::build("in-process".to_string(), Connectivity::Ready, Some(server), true)
    }

    fn build(
        target: String,
        connectivity: Connectivity,
        server: Option<Arc<ServerCore>>,
        in_process: bool,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_weak| Self {
            target,
            self_weak: self_weak.clone(),
            data: AtomicData::new(ChannelData {
                connectivity,
                server,
                watcher: None,
                watcher_generation: 0,
                enrolled: false,
                closed: false,
                in_process,
                unary_calls: Vec::new(),
                stream_calls: Vec::new(),
            }),
        })
    }

    /// Fire the armed watcher if connectivity no longer matches what it
    /// observed. Watchers that still match stay armed.
    fn fire_watcher_locked(data: &mut ChannelData) {
        let differs = data
            .watcher
            .as_ref()
            .is_some_and(|w| w.observed != data.connectivity);
        if differs {
            if let Some(watcher) = data.watcher.take() {
                watcher.queue.push(watcher.token, true);
            }
        }
    }

    fn transition_locked(data: &mut ChannelData, to: Connectivity) {
        if data.connectivity != to {
            data.connectivity = to;
            Self::fire_watcher_locked(data);
        }
    }

    /// A server claimed the address this channel is waiting on.
    pub(super) fn server_appeared(&self, server: &Arc<ServerCore>) {
        if !self.adopt_server(server) {
            self.data.use_safely(|d| {
                d.enrolled = false;
                if !d.closed {
                    Self::transition_locked(d, Connectivity::Connecting);
                }
            });
        }
    }

    fn adopt_server(&self, server: &Arc<ServerCore>) -> bool {
        if !server.add_channel(&self.self_weak) {
            return false;
        }
        self.data.use_safely(|d| {
            if d.closed {
                return;
            }
            d.server = Some(server.clone());
            d.enrolled = false;
            Self::transition_locked(d, Connectivity::Ready);
        });
        true
    }

    /// The connected server went away.
    pub(super) fn server_lost(&self) {
        self.data.use_safely(|d| {
            if d.closed {
                return;
            }
            d.server = None;
            d.enrolled = false;
            if d.connectivity == Connectivity::Ready {
                Self::transition_locked(d, Connectivity::Idle);
            }
        });
    }

    fn attempt_connect(&self, current: Connectivity) {
        if !matches!(
            current,
            Connectivity::Idle | Connectivity::Connecting | Connectivity::TransientFailure
        ) {
            return;
        }
        let this = match self.self_weak.upgrade() {
            Some(this) => this,
            None => return,
        };
        let skip = self.data.use_safely(|d| d.closed || d.in_process);
        if skip {
            return;
        }

        let need_enroll = self.data.use_safely(|d| {
            if d.enrolled {
                false
            } else {
                d.enrolled = true;
                true
            }
        });
        let found = if need_enroll {
            wire::lookup_or_enroll(&self.target, &this)
        } else {
            wire::lookup(&self.target)
        };

        match found {
            Some(server) => {
                if !self.adopt_server(&server) {
                    self.data.use_safely(|d| {
                        d.enrolled = false;
                        if !d.closed {
                            Self::transition_locked(d, Connectivity::Connecting);
                        }
                    });
                }
            }
            None => self.data.use_safely(|d| {
                if !d.closed {
                    Self::transition_locked(d, Connectivity::Connecting);
                }
            }),
        }
    }

    fn expire_watcher(&self, generation: u64) {
        let expired = self.data.use_safely(|d| {
            let matches = d
                .watcher
                .as_ref()
                .is_some_and(|w| w.generation == generation);
            if matches {
                d.watcher.take()
            } else {
                None
            }
        });
        if let Some(watcher) = expired {
            watcher.queue.push(watcher.token, false);
        }
    }

    /// Server handle for issuing a call, or the status to fail it with.
    fn call_target(&self, call_bookkeeping: impl FnOnce(&mut ChannelData)) -> Result<Arc<ServerCore>, Status> {
        self.data.use_safely(|d| {
            if d.closed {
                return Err(Status::cancelled("channel closed"));
            }
            match (&d.server, d.connectivity) {
                (Some(server), Connectivity::Ready) => {
                    let server = server.clone();
                    call_bookkeeping(d);
                    Ok(server)
                }
                _ => Err(Status::unavailable("channel is not connected")),
            }
        })
    }
}

impl ChannelTransport for ChannelCore {
    fn state(&self, try_to_connect: bool) -> Connectivity {
        let current = self.data.use_safely(|d| d.connectivity);
        if try_to_connect {
            self.attempt_connect(current);
        }
        current
    }

    fn notify_on_state_change(
        &self,
        observed: Connectivity,
        deadline: Duration,
        queue: &Arc<CompletionQueue>,
        token: Token,
    ) {
        let armed_generation = self.data.use_safely(|d| {
            if d.closed || d.connectivity != observed {
                None
            } else {
                d.watcher_generation += 1;
                d.watcher = Some(Watcher {
                    observed,
                    queue: queue.clone(),
                    token,
                    generation: d.watcher_generation,
                });
                Some(d.watcher_generation)
            }
        });

        match armed_generation {
            None => queue.push(token, true),
            Some(generation) => {
                let weak = self.self_weak.clone();
                timer::schedule(deadline, move || {
                    if let Some(channel) = weak.upgrade() {
                        channel.expire_watcher(generation);
                    }
                });
            }
        }
    }

    fn unary(
        &self,
        method: &str,
        request: Vec<u8>,
        queue: &Arc<CompletionQueue>,
        token: Token,
    ) -> Arc<dyn UnaryReceiver> {
        let call = UnaryCallCore::new(Some((queue.clone(), token)));
        let target = self.call_target(|d| {
            d.unary_calls.retain(|weak| weak.strong_count() > 0);
            d.unary_calls.push(Arc::downgrade(&call));
        });
        match target {
            Ok(server) => server.dispatch_unary(method, request, &call),
            Err(status) => call.complete(status, Vec::new()),
        }
        call
    }

    fn call_blocking(&self, method: &str, request: Vec<u8>) -> Result<Vec<u8>, Status> {
        let call = UnaryCallCore::new(None);
        let target = self.call_target(|_| {});
        match target {
            Ok(server) => server.dispatch_unary(method, request, &call),
            Err(status) => call.complete(status, Vec::new()),
        }
        let (status, response) = call.wait();
        if status.is_ok() {
            Ok(response)
        } else {
            Err(status)
        }
    }

    fn server_stream(&self, method: &str, request: Vec<u8>) -> Arc<dyn StreamReceiver> {
        let call = StreamCallCore::new();
        let target = self.call_target(|d| {
            d.stream_calls.retain(|weak| weak.strong_count() > 0);
            d.stream_calls.push(Arc::downgrade(&call));
        });
        match target {
            Ok(server) => server.dispatch_stream(method, request, &call),
            Err(status) => call.terminate(status),
        }
        call
    }

    fn close(&self) {
        let (watcher, unary_calls, stream_calls) = self.data.use_safely(|d| {
            if d.closed {
                return (None, Vec::new(), Vec::new());
            }
            d.closed = true;
            d.connectivity = Connectivity::Shutdown;
            d.server = None;
            (
                d.watcher.take(),
                std::mem::take(&mut d.unary_calls),
                std::mem::take(&mut d.stream_calls),
            )
        });

        // One final event so the engine can observe the shutdown and retire
        // the watcher's tag.
        if let Some(watcher) = watcher {
            watcher.queue.push(watcher.token, true);
        }
        for call in unary_calls.iter().filter_map(Weak::upgrade) {
            call.complete(Status::cancelled("channel closed"), Vec::new());
        }
        for call in stream_calls.iter().filter_map(Weak::upgrade) {
            call.terminate(Status::cancelled("channel closed"));
        }
    }
}
