//! The server engine.
//!
//! Owns the server transport, the completion queue, and one worker thread.
//! Handlers are registered between `bind` and `start`; each registration
//! arms the first acceptor, and the worker re-arms a sibling on every
//! accepted call so the runtime always has a pending acceptor per method.

use super::stream::{StreamController, StreamServerCall, StreamShared};
use super::unary::{UnaryResponder, UnaryServerCall};
use super::{ServerCall, StagedCallback};
use crate::codec::Message;
use crate::error::EngineError;
use crate::method::{ServerStreamMethod, UnaryMethod};
use crate::runtime::memory::MemoryRuntime;
use crate::runtime::{CompletionQueue, Runtime, ServerTransport};
use crate::tag::{HandleId, TagLabel, Tagger, NO_OWNER};
use crate::util::AtomicData;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

struct Handlers {
    calls: HashMap<HandleId, Box<dyn ServerCall>>,
    next_id: HandleId,
}

impl Handlers {
    fn alloc_id(&mut self) -> HandleId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// The server engine.
pub struct Server {
    address: String,
    transport: Arc<dyn ServerTransport>,
    queue: Arc<CompletionQueue>,
    tagger: Arc<Tagger>,
    shared: Arc<AtomicData<Handlers>>,
    worker: Option<JoinHandle<()>>,
    started: bool,
}

impl Server {
    /// Build a server bound to `address` over the in-memory runtime. An
    /// empty address serves in-process channels only.
    pub fn bind(address: &str) -> Self {
        Self::with_transport(address, MemoryRuntime.server(address))
    }

    /// Build a server over an arbitrary transport binding.
    pub fn with_transport(address: &str, transport: Arc<dyn ServerTransport>) -> Self {
        Self {
            address: address.to_string(),
            transport,
            queue: Arc::new(CompletionQueue::new()),
            tagger: Arc::new(Tagger::new()),
            shared: Arc::new(AtomicData::new(Handlers {
                calls: HashMap::new(),
                next_id: NO_OWNER + 1,
            })),
            worker: None,
            started: false,
        }
    }

    /// Register a unary handler. Rejected once the server has started.
    pub fn register_unary<Req: Message, Resp: Message>(
        &self,
        method: &UnaryMethod<Req, Resp>,
        handler: impl Fn(Req, UnaryResponder<Resp>) + Send + Sync + 'static,
    ) -> Result<(), EngineError> {
        if self.started {
            return Err(EngineError::AlreadyStarted);
        }
        let handler = Arc::new(handler);
        self.shared.use_safely(|h| {
            let id = h.alloc_id();
            let call = UnaryServerCall::armed(
                method.name,
                self.transport.clone(),
                self.queue.clone(),
                self.tagger.clone(),
                handler,
                id,
            );
            h.calls.insert(id, Box::new(call));
        });
        Ok(())
    }

    /// Register a server-stream method and return its fan-out controller.
    /// Rejected once the server has started.
    pub fn register_server_stream<Req: Message + Clone, Resp: Message>(
        &self,
        method: &ServerStreamMethod<Req, Resp>,
    ) -> Result<StreamController<Req, Resp>, EngineError> {
        if self.started {
            return Err(EngineError::AlreadyStarted);
        }
        let shared = StreamShared::fresh();
        self.shared.use_safely(|h| {
            let id = h.alloc_id();
            let call = StreamServerCall::<Req, Resp>::armed(
                method.name,
                self.transport.clone(),
                self.queue.clone(),
                self.tagger.clone(),
                shared.clone(),
                id,
            );
            h.calls.insert(id, Box::new(call));
        });
        Ok(StreamServerCall::controller(shared, self.tagger.clone()))
    }

    /// Publish the listening address and start the worker.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.started {
            return Err(EngineError::AlreadyRunning);
        }
        self.transport
            .start()
            .map_err(|_| EngineError::AddressInUse(self.address.clone()))?;

        let shared = self.shared.clone();
        let tagger = self.tagger.clone();
        let queue = self.queue.clone();
        self.worker = Some(std::thread::spawn(move || {
            worker_loop(&shared, &tagger, &queue);
        }));
        self.started = true;
        Ok(())
    }

    /// Stop accepting calls, drain the queue, and join the worker. Armed
    /// acceptors fail out, active subscribers get their deletion callbacks,
    /// and the in-flight map is empty on return.
    pub fn shutdown_and_wait(&mut self) {
        self.transport.shutdown(None);
        self.queue.shutdown();
        match self.worker.take() {
            Some(worker) => {
                let _ = worker.join();
            }
            None => {
                // Never started: retire the registration-time acceptor tags
                // ourselves.
                while let Some((token, _)) = self.queue.next() {
                    self.tagger.redeem(token);
                }
            }
        }

        let leftovers = self.shared.use_safely(|h| {
            let count = h.calls.len();
            h.calls.clear();
            count
        });
        if leftovers > 0 {
            tracing::warn!(
                count = leftovers,
                "handles still in flight after shutdown; their responders were abandoned"
            );
        }
    }

    /// Abort in-flight calls and shut down once `deadline` elapses.
    pub fn force_shutdown_in(&self, deadline: Duration) {
        self.transport.shutdown(Some(deadline));
    }

    /// The underlying transport, for in-process channel construction.
    pub fn transport(&self) -> &Arc<dyn ServerTransport> {
        &self.transport
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    #[cfg(test)]
    pub(crate) fn outstanding_tags(&self) -> usize {
        self.tagger.len()
    }

    #[cfg(test)]
    pub(crate) fn in_flight_calls(&self) -> usize {
        self.shared.use_safely(|h| h.calls.len())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown_and_wait();
    }
}

fn worker_loop(shared: &AtomicData<Handlers>, tagger: &Tagger, queue: &Arc<CompletionQueue>) {
    while let Some((token, success)) = queue.next() {
        let tag = tagger.redeem(token);
        let staged: Option<StagedCallback> = if success {
            match tag.label {
                TagLabel::ServerNewRpc => shared.use_safely(|h| {
                    let sibling_id = h.alloc_id();
                    let sibling = h
                        .calls
                        .get(&tag.owner)
                        .map(|call| call.clone_for_rearm(sibling_id));
                    match sibling {
                        Some(sibling) => {
                            h.calls.insert(sibling_id, sibling);
                            h.calls
                                .get_mut(&tag.owner)
                                .and_then(|call| call.on_accepted(tag.owner))
                        }
                        None => {
                            tracing::error!(owner = tag.owner, "accept event for an unknown handle");
                            None
                        }
                    }
                }),
                TagLabel::ServerWriting => {
                    shared.use_safely(|h| {
                        if let Some(call) = h.calls.get_mut(&tag.owner) {
                            call.on_write_complete(tag.owner);
                        }
                    });
                    None
                }
                TagLabel::ServerDone => shared.use_safely(|h| {
                    h.calls
                        .remove(&tag.owner)
                        .and_then(|mut call| call.on_removed(tag.owner))
                }),
                TagLabel::ClientConnectionChange | TagLabel::ClientFinished => {
                    panic!(
                        "client completion tag {:?} delivered to a server worker",
                        tag.label
                    );
                }
            }
        } else {
            // Cancelled acceptor or dead peer.
            shared.use_safely(|h| {
                h.calls
                    .remove(&tag.owner)
                    .and_then(|mut call| call.on_removed(tag.owner))
            })
        };

        if let Some(callback) = staged {
            callback();
        }
    }
}
