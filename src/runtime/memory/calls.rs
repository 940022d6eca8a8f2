//! Per-call shared state: the objects both ends of a loopback call touch.

use crate::runtime::{CompletionQueue, StreamReceiver, StreamWriter, UnaryFinisher, UnaryReceiver};
use crate::status::{Status, StatusCode};
use crate::tag::Token;
use crate::util::{AtomicData, BlockingQueue};
use std::sync::{Arc, Mutex, PoisonError};

/// Client-side slot for one unary call. The server's finisher writes the
/// result; the client either blocks on it (stub path) or is notified through
/// its completion queue (async path).
pub(super) struct UnaryCallCore {
    result: AtomicData<Option<(Status, Vec<u8>)>>,
    notify: Mutex<Option<(Arc<CompletionQueue>, Token)>>,
}

impl UnaryCallCore {
    pub(super) fn new(notify: Option<(Arc<CompletionQueue>, Token)>) -> Arc<Self> {
        Arc::new(Self {
            result: AtomicData::new(None),
            notify: Mutex::new(notify),
        })
    }

    /// First completion wins; later ones are ignored, which keeps the
    /// terminal event unique when a channel closes while the server replies.
    pub(super) fn complete(&self, status: Status, response: Vec<u8>) {
        let fresh = self.result.use_safely(|slot| {
            if slot.is_none() {
                *slot = Some((status, response));
                true
            } else {
                false
            }
        });
        if fresh {
            self.result.notify_all();
            let notify = self
                .notify
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some((queue, token)) = notify {
                queue.push(token, true);
            }
        }
    }

    /// Block until the call completes.
    pub(super) fn wait(&self) -> (Status, Vec<u8>) {
        self.result.wait_to_use_safely(
            |slot| slot.is_some(),
            |slot| {
                slot.take()
                    .unwrap_or((Status::internal("unary result missing"), Vec::new()))
            },
        )
    }
}

impl UnaryReceiver for UnaryCallCore {
    fn take(&self) -> (Status, Vec<u8>) {
        self.result
            .use_safely(|slot| slot.take())
            .unwrap_or((Status::internal("unary result taken before completion"), Vec::new()))
    }
}

enum StreamEvent {
    Message(Vec<u8>),
    Done,
}

struct StreamData {
    terminated: bool,
    status: Option<Status>,
    done_watch: Option<(Arc<CompletionQueue>, Token)>,
}

/// Shared state of one server-streaming call: a blocking item queue read by
/// the client's reader thread, plus termination bookkeeping.
pub(super) struct StreamCallCore {
    items: BlockingQueue<StreamEvent>,
    data: AtomicData<StreamData>,
}

impl StreamCallCore {
    pub(super) fn new() -> Arc<Self> {
        Arc::new(Self {
            items: BlockingQueue::new(),
            data: AtomicData::new(StreamData {
                terminated: false,
                status: None,
                done_watch: None,
            }),
        })
    }

    /// Queue one update for the reader. Returns false once terminated.
    pub(super) fn push_message(&self, bytes: Vec<u8>) -> bool {
        let open = self.data.use_safely(|d| !d.terminated);
        if open {
            self.items.push_back(StreamEvent::Message(bytes));
        }
        open
    }

    /// End the stream with `status`. Idempotent; the first termination fires
    /// the done watcher and unblocks the reader.
    pub(super) fn terminate(&self, status: Status) {
        let (fresh, watch) = self.data.use_safely(|d| {
            if d.terminated {
                (false, None)
            } else {
                d.terminated = true;
                d.status = Some(status.clone());
                (true, d.done_watch.take())
            }
        });
        if fresh {
            if let Some((queue, token)) = watch {
                queue.push(token, true);
            }
            self.items.push_back(StreamEvent::Done);
        }
    }

    pub(super) fn watch_done(&self, queue: Arc<CompletionQueue>, token: Token) {
        let fire_now = self.data.use_safely(|d| {
            if d.terminated {
                true
            } else {
                d.done_watch = Some((queue.clone(), token));
                false
            }
        });
        if fire_now {
            queue.push(token, true);
        }
    }
}

impl StreamReceiver for StreamCallCore {
    fn read(&self) -> Option<Vec<u8>> {
        match self.items.pop_front() {
            StreamEvent::Message(bytes) => Some(bytes),
            StreamEvent::Done => {
                // Keep the terminal marker so repeated reads stay terminal.
                self.items.push_back(StreamEvent::Done);
                None
            }
        }
    }

    fn cancel(&self) {
        self.terminate(Status::cancelled("stream cancelled by client"));
    }

    fn status(&self) -> Status {
        self.data
            .use_safely(|d| d.status.clone())
            .unwrap_or_else(|| Status::new(StatusCode::Unknown, "stream still active"))
    }
}

/// Server-side finisher for one unary call.
pub(super) struct MemUnaryFinisher {
    pub(super) call: Arc<UnaryCallCore>,
    pub(super) server_queue: Arc<CompletionQueue>,
}

impl UnaryFinisher for MemUnaryFinisher {
    fn finish(&self, response: Vec<u8>, status: Status, token: Token) {
        self.call.complete(status, response);
        self.server_queue.push(token, true);
    }

    fn finish_with_error(&self, status: Status, token: Token) {
        self.call.complete(status, Vec::new());
        self.server_queue.push(token, true);
    }
}

/// Server-side writer for one stream subscriber.
pub(super) struct MemStreamWriter {
    pub(super) call: Arc<StreamCallCore>,
    pub(super) server_queue: Arc<CompletionQueue>,
}

impl StreamWriter for MemStreamWriter {
    fn write(&self, message: Vec<u8>, token: Token) {
        let delivered = self.call.push_message(message);
        self.server_queue.push(token, delivered);
    }

    fn finish(&self, status: Status, token: Token) {
        self.call.terminate(status);
        self.server_queue.push(token, true);
    }

    fn notify_on_done(&self, token: Token) {
        self.call.watch_done(self.server_queue.clone(), token);
    }
}
