//! Server-side unary calls.

use super::{ServerCall, StagedCallback};
use crate::codec::{self, Message};
use crate::runtime::{CompletionQueue, ServerTransport, UnaryAcceptor, UnaryFinisher};
use crate::status::Status;
use crate::tag::{HandleId, TagLabel, Tagger};
use std::marker::PhantomData;
use std::sync::Arc;

struct ResponderInner {
    finisher: Arc<dyn UnaryFinisher>,
    tagger: Arc<Tagger>,
    owner: HandleId,
}

impl ResponderInner {
    fn mint_done(&self) -> crate::tag::Token {
        self.tagger.mint(self.owner, TagLabel::ServerDone)
    }
}

/// Single-shot response writer handed to unary handlers. The underlying
/// response slot stays pinned until the finish tag comes back, so the
/// handler may complete the call from any thread.
///
/// Dropping the responder without calling either completion method fails
/// the call with `Internal`, so a handler that bails out can never strand
/// the client or leave the handle in the in-flight map.
pub struct UnaryResponder<Resp> {
    inner: Option<ResponderInner>,
    _marker: PhantomData<fn(Resp)>,
}

impl<Resp: Message> UnaryResponder<Resp> {
    fn new(finisher: Arc<dyn UnaryFinisher>, tagger: Arc<Tagger>, owner: HandleId) -> Self {
        Self {
            inner: Some(ResponderInner {
                finisher,
                tagger,
                owner,
            }),
            _marker: PhantomData,
        }
    }

    /// Complete the call successfully.
    pub fn finish(mut self, response: &Resp) {
        let Some(inner) = self.inner.take() else {
            return;
        };
        let token = inner.mint_done();
        match codec::encode(response) {
            Ok(bytes) => inner.finisher.finish(bytes, Status::ok(), token),
            Err(status) => inner.finisher.finish_with_error(status, token),
        }
    }

    /// Fail the call with `status`.
    pub fn finish_with_error(mut self, status: Status) {
        let Some(inner) = self.inner.take() else {
            return;
        };
        let token = inner.mint_done();
        inner.finisher.finish_with_error(status, token);
    }
}

impl<Resp> Drop for UnaryResponder<Resp> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            let token = inner.mint_done();
            inner.finisher.finish_with_error(
                Status::internal("handler dropped the responder without responding"),
                token,
            );
        }
    }
}

type Handler<Req, Resp> = Arc<dyn Fn(Req, UnaryResponder<Resp>) + Send + Sync>;

/// Armed acceptor-and-call handle for one unary method.
pub(crate) struct UnaryServerCall<Req, Resp> {
    method: &'static str,
    transport: Arc<dyn ServerTransport>,
    queue: Arc<CompletionQueue>,
    tagger: Arc<Tagger>,
    handler: Handler<Req, Resp>,
    acceptor: Arc<dyn UnaryAcceptor>,
}

impl<Req: Message, Resp: Message> UnaryServerCall<Req, Resp> {
    /// Arm a fresh acceptor with a `ServerNewRpc` tag owned by `id`.
    pub(crate) fn armed(
        method: &'static str,
        transport: Arc<dyn ServerTransport>,
        queue: Arc<CompletionQueue>,
        tagger: Arc<Tagger>,
        handler: Handler<Req, Resp>,
        id: HandleId,
    ) -> Self {
        let token = tagger.mint(id, TagLabel::ServerNewRpc);
        let acceptor = transport.request_unary(method, &queue, token);
        Self {
            method,
            transport,
            queue,
            tagger,
            handler,
            acceptor,
        }
    }
}

impl<Req: Message, Resp: Message> ServerCall for UnaryServerCall<Req, Resp> {
    fn clone_for_rearm(&self, id: HandleId) -> Box<dyn ServerCall> {
        Box::new(Self::armed(
            self.method,
            self.transport.clone(),
            self.queue.clone(),
            self.tagger.clone(),
            self.handler.clone(),
            id,
        ))
    }

    fn on_accepted(&mut self, id: HandleId) -> Option<StagedCallback> {
        let (request_bytes, finisher) = self.acceptor.take_call()?;
        let handler = self.handler.clone();
        let tagger = self.tagger.clone();
        Some(Box::new(move || match codec::decode::<Req>(&request_bytes) {
            Ok(request) => {
                let responder = UnaryResponder::new(finisher, tagger, id);
                handler(request, responder);
            }
            Err(status) => {
                let token = tagger.mint(id, TagLabel::ServerDone);
                finisher.finish_with_error(status, token);
            }
        }))
    }

    fn on_write_complete(&mut self, id: HandleId) {
        tracing::error!(id, method = self.method, "write completion on a unary call");
    }

    fn on_removed(&mut self, _id: HandleId) -> Option<StagedCallback> {
        None
    }
}
