//! Client-side stream subscriptions.
//!
//! Each active subscription owns one reader thread blocked in the runtime's
//! stream read. The subscription itself outlives disconnects: the engine
//! stops it when the channel leaves `Connected` and starts a fresh stream
//! (new runtime call, new reader) on every reconnect.

use crate::codec::{self, Message};
use crate::runtime::{ChannelTransport, StreamReceiver};
use crate::status::Status;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Identifies one registered subscription on a client.
pub type StreamId = u64;

/// Type-erased subscription stored in the engine's stream set. Every method
/// returns the previous reader's join handle, if any, so the engine can join
/// it outside its mutex.
pub(crate) trait ClientStream: Send {
    fn start(&mut self, channel: &Arc<dyn ChannelTransport>) -> Option<JoinHandle<()>>;

    /// Cancel the active stream, if any. The subscription is restarted on
    /// the next transition to connected.
    fn stop(&mut self) -> Option<JoinHandle<()>>;

    /// Cancel the active stream and mark the subscription stopped for good;
    /// reconnects no longer restart it.
    fn retire(&mut self) -> Option<JoinHandle<()>>;
}

struct ActiveStream {
    call: Arc<dyn StreamReceiver>,
    cancelled: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

pub(crate) struct StreamSubscription<Req, Resp> {
    method: &'static str,
    request: Req,
    on_update: Arc<dyn Fn(Resp) + Send + Sync>,
    on_finish: Arc<dyn Fn(Status) + Send + Sync>,
    active: Option<ActiveStream>,
    stopped: bool,
}

impl<Req, Resp> StreamSubscription<Req, Resp> {
    pub(crate) fn new(
        method: &'static str,
        request: Req,
        on_update: Arc<dyn Fn(Resp) + Send + Sync>,
        on_finish: Arc<dyn Fn(Status) + Send + Sync>,
    ) -> Self {
        Self {
            method,
            request,
            on_update,
            on_finish,
            active: None,
            stopped: false,
        }
    }
}

impl<Req: Message + Clone, Resp: Message> ClientStream for StreamSubscription<Req, Resp> {
    fn start(&mut self, channel: &Arc<dyn ChannelTransport>) -> Option<JoinHandle<()>> {
        if self.stopped {
            return None;
        }
        let stale_reader = self.stop();

        let request = match codec::encode(&self.request) {
            Ok(bytes) => bytes,
            Err(status) => {
                tracing::error!(method = self.method, %status, "stream request failed to encode");
                return stale_reader;
            }
        };

        let call = channel.server_stream(self.method, request);
        let cancelled = Arc::new(AtomicBool::new(false));

        let reader_call = call.clone();
        let reader_cancelled = cancelled.clone();
        let on_update = self.on_update.clone();
        let on_finish = self.on_finish.clone();
        let method = self.method;
        let reader = std::thread::spawn(move || {
            while let Some(bytes) = reader_call.read() {
                if reader_cancelled.load(Ordering::Acquire) {
                    continue;
                }
                match codec::decode::<Resp>(&bytes) {
                    Ok(update) => on_update(update),
                    Err(status) => {
                        tracing::warn!(method, %status, "dropping undecodable stream update");
                    }
                }
            }
            on_finish(reader_call.status());
        });

        self.active = Some(ActiveStream {
            call,
            cancelled,
            reader: Some(reader),
        });
        stale_reader
    }

    fn stop(&mut self) -> Option<JoinHandle<()>> {
        let mut active = self.active.take()?;
        active.cancelled.store(true, Ordering::Release);
        active.call.cancel();
        active.reader.take()
    }

    fn retire(&mut self) -> Option<JoinHandle<()>> {
        self.stopped = true;
        self.stop()
    }
}
