//! Loopback server core: acceptor arming and call dispatch.

use super::calls::{MemStreamWriter, MemUnaryFinisher, StreamCallCore, UnaryCallCore};
use super::channel::ChannelCore;
use super::{timer, wire};
use crate::runtime::{
    ChannelTransport, CompletionQueue, ServerTransport, StreamAcceptor, StreamWriter,
    UnaryAcceptor, UnaryFinisher,
};
use crate::status::Status;
use crate::tag::Token;
use crate::util::AtomicData;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

/// Slot an accepted unary call lands in.
#[derive(Default)]
pub(super) struct UnaryAcceptorCore {
    slot: Mutex<Option<(Vec<u8>, Arc<dyn UnaryFinisher>)>>,
}

impl UnaryAcceptorCore {
    fn put(&self, request: Vec<u8>, finisher: Arc<dyn UnaryFinisher>) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some((request, finisher));
    }
}

impl UnaryAcceptor for UnaryAcceptorCore {
    fn take_call(&self) -> Option<(Vec<u8>, Arc<dyn UnaryFinisher>)> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

#[derive(Default)]
pub(super) struct StreamAcceptorCore {
    slot: Mutex<Option<(Vec<u8>, Arc<dyn StreamWriter>)>>,
}

impl StreamAcceptorCore {
    fn put(&self, request: Vec<u8>, writer: Arc<dyn StreamWriter>) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some((request, writer));
    }
}

impl StreamAcceptor for StreamAcceptorCore {
    fn take_call(&self) -> Option<(Vec<u8>, Arc<dyn StreamWriter>)> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

struct ArmedUnary {
    queue: Arc<CompletionQueue>,
    token: Token,
    acceptor: Arc<UnaryAcceptorCore>,
}

struct ArmedStream {
    queue: Arc<CompletionQueue>,
    token: Token,
    acceptor: Arc<StreamAcceptorCore>,
}

#[derive(Default)]
struct ServerData {
    started: bool,
    registered: bool,
    shut: bool,
    unary_acceptors: HashMap<String, VecDeque<ArmedUnary>>,
    stream_acceptors: HashMap<String, VecDeque<ArmedStream>>,
    pending_unary: HashMap<String, VecDeque<(Vec<u8>, Arc<UnaryCallCore>)>>,
    pending_streams: HashMap<String, VecDeque<(Vec<u8>, Arc<StreamCallCore>)>>,
    channels: Vec<Weak<ChannelCore>>,
    active_streams: Vec<Weak<StreamCallCore>>,
}

pub(crate) struct ServerCore {
    address: String,
    self_weak: Weak<ServerCore>,
    data: AtomicData<ServerData>,
}

impl ServerCore {
    pub(crate) fn new(address: &str) -> Arc<Self> {
        Arc::new_cyclic(|self_weak| Self {
            address: address.to_string(),
            self_weak: self_weak.clone(),
            data: AtomicData::default(),
        })
    }

    /// Attach a connected channel. Fails once the server has shut down.
    pub(super) fn add_channel(&self, channel: &Weak<ChannelCore>) -> bool {
        self.data.use_safely(|d| {
            if d.shut {
                false
            } else {
                d.channels.retain(|weak| weak.strong_count() > 0);
                d.channels.push(channel.clone());
                true
            }
        })
    }

    pub(super) fn dispatch_unary(&self, method: &str, request: Vec<u8>, call: &Arc<UnaryCallCore>) {
        let failure = self.data.use_safely(|d| {
            if d.shut {
                return Some(Status::unavailable("server is shutting down"));
            }
            let Some(armed) = d.unary_acceptors.get_mut(method) else {
                return Some(Status::unimplemented(format!("unknown method: {method}")));
            };
            match armed.pop_front() {
                Some(slot) => {
                    let finisher: Arc<dyn UnaryFinisher> = Arc::new(MemUnaryFinisher {
                        call: call.clone(),
                        server_queue: slot.queue.clone(),
                    });
                    slot.acceptor.put(request, finisher);
                    slot.queue.push(slot.token, true);
                }
                None => {
                    d.pending_unary
                        .entry(method.to_string())
                        .or_default()
                        .push_back((request, call.clone()));
                }
            }
            None
        });
        if let Some(status) = failure {
            call.complete(status, Vec::new());
        }
    }

    pub(super) fn dispatch_stream(&self, method: &str, request: Vec<u8>, call: &Arc<StreamCallCore>) {
        let failure = self.data.use_safely(|d| {
            if d.shut {
                return Some(Status::unavailable("server is shutting down"));
            }
            let Some(armed) = d.stream_acceptors.get_mut(method) else {
                return Some(Status::unimplemented(format!("unknown method: {method}")));
            };
            d.active_streams.retain(|weak| weak.strong_count() > 0);
            d.active_streams.push(Arc::downgrade(call));
            match armed.pop_front() {
                Some(slot) => {
                    let writer: Arc<dyn StreamWriter> = Arc::new(MemStreamWriter {
                        call: call.clone(),
                        server_queue: slot.queue.clone(),
                    });
                    slot.acceptor.put(request, writer);
                    slot.queue.push(slot.token, true);
                }
                None => {
                    d.pending_streams
                        .entry(method.to_string())
                        .or_default()
                        .push_back((request, call.clone()));
                }
            }
            None
        });
        if let Some(status) = failure {
            call.terminate(status);
        }
    }

    fn do_shutdown(&self) {
        struct Teardown {
            registered: bool,
            armed_unary: Vec<ArmedUnary>,
            armed_streams: Vec<ArmedStream>,
            pending_unary: Vec<Arc<UnaryCallCore>>,
            pending_streams: Vec<Arc<StreamCallCore>>,
            channels: Vec<Weak<ChannelCore>>,
            active_streams: Vec<Weak<StreamCallCore>>,
        }

        let teardown = self.data.use_safely(|d| {
            if d.shut {
                return None;
            }
            d.shut = true;
            Some(Teardown {
                registered: d.registered,
                armed_unary: d.unary_acceptors.drain().flat_map(|(_, q)| q).collect(),
                armed_streams: d.stream_acceptors.drain().flat_map(|(_, q)| q).collect(),
                pending_unary: d
                    .pending_unary
                    .drain()
                    .flat_map(|(_, q)| q)
                    .map(|(_, call)| call)
                    .collect(),
                pending_streams: d
                    .pending_streams
                    .drain()
                    .flat_map(|(_, q)| q)
                    .map(|(_, call)| call)
                    .collect(),
                channels: std::mem::take(&mut d.channels),
                active_streams: std::mem::take(&mut d.active_streams),
            })
        });
        let Some(teardown) = teardown else { return };

        if teardown.registered {
            if let Some(this) = self.self_weak.upgrade() {
                wire::unregister_server(&self.address, &this);
            }
        }

        let unavailable = || Status::unavailable("server is shutting down");
        for armed in teardown.armed_unary {
            armed.queue.push(armed.token, false);
        }
        for armed in teardown.armed_streams {
            armed.queue.push(armed.token, false);
        }
        for call in teardown.pending_unary {
            call.complete(unavailable(), Vec::new());
        }
        for call in teardown.pending_streams {
            call.terminate(unavailable());
        }
        for call in teardown.active_streams.iter().filter_map(Weak::upgrade) {
            call.terminate(unavailable());
        }
        for channel in teardown.channels.iter().filter_map(Weak::upgrade) {
            channel.server_lost();
        }
    }
}

impl ServerTransport for ServerCore {
    fn start(&self) -> Result<(), Status> {
        let this = self
            .self_weak
            .upgrade()
            .expect("server transport outlived its core");
        let startable = self.data.use_safely(|d| !d.started && !d.shut);
        if !startable {
            return Err(Status::internal("server already started"));
        }
        if !self.address.is_empty() {
            wire::register_server(&self.address, &this)?;
        }
        self.data.use_safely(|d| {
            d.started = true;
            d.registered = !self.address.is_empty();
        });
        Ok(())
    }

    fn request_unary(
        &self,
        method: &str,
        queue: &Arc<CompletionQueue>,
        token: Token,
    ) -> Arc<dyn UnaryAcceptor> {
        let acceptor = Arc::new(UnaryAcceptorCore::default());
        let rejected = self.data.use_safely(|d| {
            if d.shut {
                return true;
            }
            d.unary_acceptors.entry(method.to_string()).or_default();
            let pending = d
                .pending_unary
                .get_mut(method)
                .and_then(|backlog| backlog.pop_front());
            match pending {
                Some((request, call)) => {
                    let finisher: Arc<dyn UnaryFinisher> = Arc::new(MemUnaryFinisher {
                        call,
                        server_queue: queue.clone(),
                    });
                    acceptor.put(request, finisher);
                    queue.push(token, true);
                }
                None => {
                    if let Some(armed) = d.unary_acceptors.get_mut(method) {
                        armed.push_back(ArmedUnary {
                            queue: queue.clone(),
                            token,
                            acceptor: acceptor.clone(),
                        });
                    }
                }
            }
            false
        });
        if rejected {
            queue.push(token, false);
        }
        acceptor
    }

    fn request_server_stream(
        &self,
        method: &str,
        queue: &Arc<CompletionQueue>,
        token: Token,
    ) -> Arc<dyn StreamAcceptor> {
        let acceptor = Arc::new(StreamAcceptorCore::default());
        let rejected = self.data.use_safely(|d| {
            if d.shut {
                return true;
            }
            d.stream_acceptors.entry(method.to_string()).or_default();
            let pending = d
                .pending_streams
                .get_mut(method)
                .and_then(|backlog| backlog.pop_front());
            match pending {
                Some((request, call)) => {
                    let writer: Arc<dyn StreamWriter> = Arc::new(MemStreamWriter {
                        call,
                        server_queue: queue.clone(),
                    });
                    acceptor.put(request, writer);
                    queue.push(token, true);
                }
                None => {
                    if let Some(armed) = d.stream_acceptors.get_mut(method) {
                        armed.push_back(ArmedStream {
                            queue: queue.clone(),
                            token,
                            acceptor: acceptor.clone(),
                        });
                    }
                }
            }
            false
        });
        if rejected {
            queue.push(token, false);
        }
        acceptor
    }

    fn shutdown(&self, deadline: Option<Duration>) {
        match deadline {
            Some(delay) => {
                let weak = self.self_weak.clone();
                timer::schedule(delay, move || {
                    if let Some(server) = weak.upgrade() {
                        server.do_shutdown();
                    }
                });
            }
            None => self.do_shutdown(),
        }
    }

    fn in_process_channel(&self) -> Arc<dyn ChannelTransport> {
        let this = self
            .self_weak
            .upgrade()
            .expect("server transport outlived its core");
        ChannelCore::in_process(this)
    }
}
