//! Server-side streams: accepted subscribers and the fan-out controller.
//!
//! The ordering contract lives here. `write` waits until every tag from the
//! previous batch has been redeemed before issuing the next batch, which
//! yields in-order delivery per subscriber and batch ordering across them.
//! A subscriber becomes eligible for writes only after its on-connect
//! callback has completed.

use super::{ServerCall, StagedCallback};
use crate::codec::{self, Message};
use crate::error::EngineError;
use crate::runtime::{CompletionQueue, ServerTransport, StreamAcceptor, StreamWriter};
use crate::tag::{HandleId, TagLabel, Tagger};
use crate::util::AtomicData;
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;

/// Identifies one active subscriber of a server stream.
pub type SubscriberId = HandleId;

type SubscriberCallback<Req> = Arc<dyn Fn(&Req, SubscriberId) + Send + Sync>;

struct Fanout {
    subscribers: HashMap<SubscriberId, Arc<dyn StreamWriter>>,
    processing: HashSet<SubscriberId>,
}

struct Callbacks<Req> {
    on_connect: Option<SubscriberCallback<Req>>,
    on_delete: Option<SubscriberCallback<Req>>,
}

/// State shared between the controller (application threads) and the
/// engine's stream handles (worker thread).
pub(crate) struct StreamShared<Req> {
    fanout: AtomicData<Fanout>,
    requests: AtomicData<HashMap<SubscriberId, Req>>,
    callbacks: AtomicData<Callbacks<Req>>,
}

impl<Req> StreamShared<Req> {
    pub(crate) fn fresh() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn new() -> Self {
        Self {
            fanout: AtomicData::new(Fanout {
                subscribers: HashMap::new(),
                processing: HashSet::new(),
            }),
            requests: AtomicData::new(HashMap::new()),
            callbacks: AtomicData::new(Callbacks {
                on_connect: None,
                on_delete: None,
            }),
        }
    }
}

/// Application-side handle for one registered server-stream method.
pub struct StreamController<Req, Resp> {
    shared: Arc<StreamShared<Req>>,
    tagger: Arc<Tagger>,
    _marker: PhantomData<fn(Resp)>,
}

impl<Req: Message + Clone, Resp: Message> StreamController<Req, Resp> {
    /// Called with each subscriber's request once its connection has been
    /// accepted, before the subscriber can receive writes.
    pub fn on_connect(&self, callback: impl Fn(&Req, SubscriberId) + Send + Sync + 'static) {
        self.shared
            .callbacks
            .use_safely(|c| c.on_connect = Some(Arc::new(callback)));
    }

    /// Called exactly once when a subscriber goes away, whether it cancelled,
    /// disconnected, or the server shut down.
    pub fn on_delete(&self, callback: impl Fn(&Req, SubscriberId) + Send + Sync + 'static) {
        self.shared
            .callbacks
            .use_safely(|c| c.on_delete = Some(Arc::new(callback)));
    }

    /// Send `update` to every active subscriber. Blocks until the previous
    /// batch of writes has been redeemed, preserving per-subscriber order.
    pub fn write(&self, update: &Resp) -> Result<(), EngineError> {
        let bytes =
            codec::encode(update).map_err(|status| EngineError::Encode(status.message))?;
        self.shared.fanout.wait_to_use_safely(
            |f| f.processing.is_empty(),
            |f| {
                for (id, writer) in &f.subscribers {
                    let token = self.tagger.mint(*id, TagLabel::ServerWriting);
                    writer.write(bytes.clone(), token);
                    f.processing.insert(*id);
                }
            },
        );
        Ok(())
    }

    /// Send `update` to one subscriber. Returns false if the subscriber is
    /// no longer active.
    pub fn write_to(&self, update: &Resp, subscriber: SubscriberId) -> Result<bool, EngineError> {
        let bytes =
            codec::encode(update).map_err(|status| EngineError::Encode(status.message))?;
        let delivered = self.shared.fanout.wait_to_use_safely(
            |f| f.processing.is_empty(),
            |f| match f.subscribers.get(&subscriber) {
                Some(writer) => {
                    let token = self.tagger.mint(subscriber, TagLabel::ServerWriting);
                    writer.write(bytes, token);
                    f.processing.insert(subscriber);
                    true
                }
                None => false,
            },
        );
        Ok(delivered)
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.fanout.use_safely(|f| f.subscribers.len())
    }
}

/// Armed acceptor-and-subscriber handle for one server-stream method.
pub(crate) struct StreamServerCall<Req, Resp> {
    method: &'static str,
    transport: Arc<dyn ServerTransport>,
    queue: Arc<CompletionQueue>,
    tagger: Arc<Tagger>,
    shared: Arc<StreamShared<Req>>,
    acceptor: Arc<dyn StreamAcceptor>,
    _marker: PhantomData<fn(Resp)>,
}

impl<Req: Message + Clone, Resp: Message> StreamServerCall<Req, Resp> {
    pub(crate) fn armed(
        method: &'static str,
        transport: Arc<dyn ServerTransport>,
        queue: Arc<CompletionQueue>,
        tagger: Arc<Tagger>,
        shared: Arc<StreamShared<Req>>,
        id: HandleId,
    ) -> Self {
        let token = tagger.mint(id, TagLabel::ServerNewRpc);
        let acceptor = transport.request_server_stream(method, &queue, token);
        Self {
            method,
            transport,
            queue,
            tagger,
            shared,
            acceptor,
            _marker: PhantomData,
        }
    }

    pub(crate) fn controller(
        shared: Arc<StreamShared<Req>>,
        tagger: Arc<Tagger>,
    ) -> StreamController<Req, Resp> {
        StreamController {
            shared,
            tagger,
            _marker: PhantomData,
        }
    }
}

impl<Req: Message + Clone, Resp: Message> ServerCall for StreamServerCall<Req, Resp> {
    fn clone_for_rearm(&self, id: HandleId) -> Box<dyn ServerCall> {
        Box::new(Self::armed(
            self.method,
            self.transport.clone(),
            self.queue.clone(),
            self.tagger.clone(),
            self.shared.clone(),
            id,
        ))
    }

    fn on_accepted(&mut self, id: HandleId) -> Option<StagedCallback> {
        let (request_bytes, writer) = self.acceptor.take_call()?;
        // Watch for the call ending before anything else so a subscriber
        // that disappears is always observed, written-to or not.
        let done_token = self.tagger.mint(id, TagLabel::ServerDone);
        writer.notify_on_done(done_token);

        let shared = self.shared.clone();
        let tagger = self.tagger.clone();
        let method = self.method;
        Some(Box::new(move || {
            match codec::decode::<Req>(&request_bytes) {
                Ok(request) => {
                    let on_connect = shared.callbacks.use_safely(|c| c.on_connect.clone());
                    if let Some(callback) = on_connect {
                        callback(&request, id);
                    }
                    // Eligible for fan-out only now that the connect
                    // callback has completed.
                    shared.requests.use_safely(|r| {
                        r.insert(id, request);
                    });
                    shared.fanout.use_safely(|f| {
                        f.subscribers.insert(id, writer.clone());
                    });
                }
                Err(status) => {
                    tracing::warn!(method, %status, "rejecting stream call with undecodable request");
                    let token = tagger.mint(id, TagLabel::ServerDone);
                    writer.finish(status, token);
                }
            }
        }))
    }

    fn on_write_complete(&mut self, id: HandleId) {
        let idle = self.shared.fanout.use_safely(|f| {
            f.processing.remove(&id);
            f.processing.is_empty()
        });
        if idle {
            self.shared.fanout.notify_all();
        }
    }

    fn on_removed(&mut self, id: HandleId) -> Option<StagedCallback> {
        let idle = self.shared.fanout.use_safely(|f| {
            f.subscribers.remove(&id);
            f.processing.remove(&id);
            f.processing.is_empty()
        });
        if idle {
            self.shared.fanout.notify_all();
        }

        let request = self.shared.requests.use_safely(|r| r.remove(&id))?;
        let shared = self.shared.clone();
        Some(Box::new(move || {
            let on_delete = shared.callbacks.use_safely(|c| c.on_delete.clone());
            if let Some(callback) = on_delete {
                callback(&request, id);
            }
        }))
    }
}
