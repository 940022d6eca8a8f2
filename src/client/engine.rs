//! The client engine.
//!
//! Owns the channel, the completion queue, and one worker thread that drains
//! it. The worker redeems tags, drives the connection-state machine, and
//! dispatches unary completions; user callbacks always run with the engine
//! mutex released.

use super::state::{to_connection_state, ConnectionState};
use super::stream::{ClientStream, StreamId, StreamSubscription};
use super::unary::{ClientRpc, UnaryClientCall};
use crate::codec::{self, Message};
use crate::method::{ServerStreamMethod, UnaryMethod};
use crate::runtime::memory::MemoryRuntime;
use crate::runtime::{ChannelTransport, CompletionQueue, Connectivity, Runtime};
use crate::server::Server;
use crate::status::Status;
use crate::tag::{HandleId, TagLabel, Tagger, NO_OWNER};
use crate::util::AtomicData;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Consecutive watchdog expirations tolerated before warning that the
/// channel may be silently shut down.
const WATCH_FAILURE_WARN_THRESHOLD: u32 = 5;

/// Connection-watchdog deadlines.
#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    /// Watchdog deadline while the first connection is being established.
    pub initial_connect_deadline: Duration,
    /// Watchdog deadline once the engine is in steady state.
    pub steady_state_deadline: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            initial_connect_deadline: Duration::from_secs(15),
            steady_state_deadline: Duration::from_secs(60),
        }
    }
}

type StateCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

struct Shared {
    connectivity: Connectivity,
    channel: Option<Arc<dyn ChannelTransport>>,
    queue: Option<Arc<CompletionQueue>>,
    rpcs: HashMap<HandleId, Box<dyn ClientRpc>>,
    streams: HashMap<StreamId, Box<dyn ClientStream>>,
    next_id: HandleId,
    watch_failures: u32,
}

impl Shared {
    fn alloc_id(&mut self) -> HandleId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// Typed synchronous call surface handed out by [`Client::use_stub`].
pub struct Stub {
    channel: Arc<dyn ChannelTransport>,
}

impl Stub {
    /// Blocking unary call.
    pub fn call<Req: Message, Resp: Message>(
        &self,
        method: &UnaryMethod<Req, Resp>,
        request: &Req,
    ) -> Result<Resp, Status> {
        let bytes = codec::encode(request)?;
        let response = self.channel.call_blocking(method.name, bytes)?;
        codec::decode(&response)
    }
}

/// The client engine.
pub struct Client {
    runtime: Arc<dyn Runtime>,
    config: ClientConfig,
    tagger: Arc<Tagger>,
    shared: Arc<AtomicData<Shared>>,
    worker: Option<JoinHandle<()>>,
    server_address: String,
    using_in_process_server: bool,
}

impl Client {
    pub fn new() -> Self {
        Self::with_runtime(Arc::new(MemoryRuntime))
    }

    pub fn with_runtime(runtime: Arc<dyn Runtime>) -> Self {
        Self::with_runtime_and_config(runtime, ClientConfig::default())
    }

    pub fn with_runtime_and_config(runtime: Arc<dyn Runtime>, config: ClientConfig) -> Self {
        Self {
            runtime,
            config,
            tagger: Arc::new(Tagger::new()),
            shared: Arc::new(AtomicData::new(Shared {
                connectivity: Connectivity::Idle,
                channel: None,
                queue: None,
                rpcs: HashMap::new(),
                streams: HashMap::new(),
                next_id: NO_OWNER + 1,
                watch_failures: 0,
            })),
            worker: None,
            server_address: String::new(),
            using_in_process_server: false,
        }
    }

    /// Connect to `address`, tearing down any previous channel and its
    /// streams first. `on_state_change` is invoked from the worker thread
    /// whenever the three-valued state changes, duplicates collapsed.
    pub fn change_server(
        &mut self,
        address: &str,
        on_state_change: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) {
        self.kill();
        self.using_in_process_server = false;
        self.server_address = address.to_string();

        let queue = Arc::new(CompletionQueue::new());
        let channel = self.runtime.channel(address);
        let callback: StateCallback = Arc::new(on_state_change);

        let mut announce = None;
        self.shared.use_safely(|d| {
            d.queue = Some(queue.clone());
            d.channel = Some(channel.clone());
            d.watch_failures = 0;

            let previous = to_connection_state(d.connectivity);
            let connectivity = channel.state(true);
            d.connectivity = connectivity;
            let current = to_connection_state(connectivity);
            if current != previous {
                announce = Some(current);
            }

            let token = self.tagger.mint(NO_OWNER, TagLabel::ClientConnectionChange);
            channel.notify_on_state_change(
                connectivity,
                self.config.initial_connect_deadline,
                &queue,
                token,
            );
        });

        if let Some(state) = announce {
            callback(state);
        }
        self.spawn_worker(queue, Some(callback));
    }

    /// Connect to a server running in this process. The state is permanently
    /// `Connected`; no transitions are emitted.
    pub fn connect_in_process(&mut self, server: &Server) {
        self.kill();
        self.using_in_process_server = true;
        self.server_address = "in-process".to_string();

        let queue = Arc::new(CompletionQueue::new());
        let channel = server.transport().in_process_channel();
        self.shared.use_safely(|d| {
            d.queue = Some(queue.clone());
            d.channel = Some(channel);
            d.connectivity = Connectivity::Ready;
        });
        self.spawn_worker(queue, None);
    }

    /// Run `usage` against the stub if the channel is `Connected`, without
    /// invoking it otherwise.
    pub fn use_stub<R>(&self, usage: impl FnOnce(&Stub) -> R) -> Option<R> {
        self.shared.use_safely(|d| match (&d.channel, d.connectivity) {
            (Some(channel), Connectivity::Ready) => Some(usage(&Stub {
                channel: channel.clone(),
            })),
            _ => None,
        })
    }

    /// Start an asynchronous unary call. The terminal callback is invoked
    /// exactly once: from the worker thread on completion, or immediately
    /// with `Unavailable` when the engine has no channel.
    pub fn start_unary<Req: Message, Resp: Message>(
        &self,
        method: &UnaryMethod<Req, Resp>,
        request: &Req,
        on_finish: impl FnOnce(Status, Option<Resp>) + Send + 'static,
    ) {
        let mut on_finish = Some(on_finish);
        let bytes = match codec::encode(request) {
            Ok(bytes) => bytes,
            Err(status) => {
                if let Some(callback) = on_finish.take() {
                    callback(status, None);
                }
                return;
            }
        };

        let name = method.name;
        let rejected = self.shared.use_safely(|d| match (d.channel.clone(), d.queue.clone()) {
            (Some(channel), Some(queue)) => {
                let id = d.alloc_id();
                let token = self.tagger.mint(id, TagLabel::ClientFinished);
                let receiver = channel.unary(name, bytes, &queue, token);
                let callback = on_finish
                    .take()
                    .map(|cb| Box::new(cb) as Box<dyn FnOnce(Status, Option<Resp>) + Send>);
                if let Some(callback) = callback {
                    d.rpcs
                        .insert(id, Box::new(UnaryClientCall::new(receiver, callback)));
                }
                None
            }
            _ => Some(Status::unavailable("client has no active channel")),
        });

        if let Some(status) = rejected {
            if let Some(callback) = on_finish.take() {
                callback(status, None);
            }
        }
    }

    /// Register a server-stream subscription. Started immediately when the
    /// channel is already `Connected`, otherwise the moment it becomes so;
    /// restarted after every reconnect until stopped.
    pub fn register_stream<Req: Message + Clone, Resp: Message>(
        &self,
        method: &ServerStreamMethod<Req, Resp>,
        request: Req,
        on_update: impl Fn(Resp) + Send + Sync + 'static,
        on_finish: impl Fn(Status) + Send + Sync + 'static,
    ) -> StreamId {
        let mut subscription = StreamSubscription::new(
            method.name,
            request,
            Arc::new(on_update),
            Arc::new(on_finish),
        );
        self.shared.use_safely(|d| {
            let id = d.alloc_id();
            if d.connectivity == Connectivity::Ready {
                if let Some(channel) = &d.channel {
                    let _ = subscription.start(channel);
                }
            }
            d.streams.insert(id, Box::new(subscription));
            id
        })
    }

    /// Cancel one subscription's active stream. The subscription stays
    /// registered and is not restarted; the finish callback fires once.
    pub fn stop_stream(&self, id: StreamId) {
        let reader = self
            .shared
            .use_safely(|d| d.streams.get_mut(&id).and_then(|s| s.retire()));
        if let Some(reader) = reader {
            let _ = reader.join();
        }
    }

    /// Stop every stream, close the channel (completing in-flight calls with
    /// `Cancelled`), shut the completion queue, and join the worker.
    pub fn kill(&mut self) {
        let mut readers = Vec::new();
        let queue = self.shared.use_safely(|d| {
            for stream in d.streams.values_mut() {
                if let Some(reader) = stream.stop() {
                    readers.push(reader);
                }
            }
            if let Some(channel) = d.channel.take() {
                // The close fires the armed watcher one last time; the worker
                // synthesizes the final NotConnected transition while
                // draining, so connectivity is left for it to update.
                channel.close();
            }
            d.queue.take()
        });

        if let Some(queue) = queue {
            queue.shutdown();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        for reader in readers {
            let _ = reader.join();
        }
        self.shared
            .use_safely(|d| d.connectivity = Connectivity::Shutdown);
    }

    pub fn get_state(&self) -> ConnectionState {
        to_connection_state(self.shared.use_safely(|d| d.connectivity))
    }

    pub fn get_server_address(&self) -> &str {
        &self.server_address
    }

    pub fn is_using_in_process_server(&self) -> bool {
        self.using_in_process_server
    }

    fn spawn_worker(&mut self, queue: Arc<CompletionQueue>, callback: Option<StateCallback>) {
        let shared = self.shared.clone();
        let tagger = self.tagger.clone();
        let steady_deadline = self.config.steady_state_deadline;
        self.worker = Some(std::thread::spawn(move || {
            worker_loop(&shared, &tagger, &queue, callback, steady_deadline);
        }));
    }

    #[cfg(test)]
    pub(crate) fn outstanding_tags(&self) -> usize {
        self.tagger.len()
    }

    #[cfg(test)]
    pub(crate) fn in_flight_rpcs(&self) -> usize {
        self.shared.use_safely(|d| d.rpcs.len())
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.kill();
    }
}

fn worker_loop(
    shared: &AtomicData<Shared>,
    tagger: &Tagger,
    queue: &Arc<CompletionQueue>,
    on_state_change: Option<StateCallback>,
    steady_deadline: Duration,
) {
    while let Some((token, success)) = queue.next() {
        let tag = tagger.redeem(token);
        match tag.label {
            TagLabel::ClientConnectionChange => handle_connection_change(
                shared,
                tagger,
                queue,
                on_state_change.as_ref(),
                steady_deadline,
                success,
            ),
            TagLabel::ClientFinished => {
                let rpc = shared.use_safely(|d| d.rpcs.remove(&tag.owner));
                if let Some(rpc) = rpc {
                    rpc.complete(success);
                }
            }
            TagLabel::ServerNewRpc | TagLabel::ServerWriting | TagLabel::ServerDone => {
                panic!(
                    "server completion tag {:?} delivered to a client worker",
                    tag.label
                );
            }
        }
    }
}

fn handle_connection_change(
    shared: &AtomicData<Shared>,
    tagger: &Tagger,
    queue: &Arc<CompletionQueue>,
    on_state_change: Option<&StateCallback>,
    steady_deadline: Duration,
    success: bool,
) {
    let mut announce = None;
    let mut stale_readers = Vec::new();

    shared.use_safely(|d| {
        let channel = match &d.channel {
            Some(channel) => channel.clone(),
            None => {
                // Channel already torn down; synthesize the final transition
                // if the user-visible state was not already disconnected.
                if to_connection_state(d.connectivity) != ConnectionState::NotConnected {
                    d.connectivity = Connectivity::Shutdown;
                    announce = Some(ConnectionState::NotConnected);
                }
                return;
            }
        };

        if success {
            d.watch_failures = 0;
        } else {
            // Watchdog deadline expired; benign, but repeated expirations
            // with no successful observation suggest a dead channel.
            d.watch_failures += 1;
            if d.watch_failures >= WATCH_FAILURE_WARN_THRESHOLD {
                tracing::warn!(
                    expirations = d.watch_failures,
                    "connection watchdog keeps expiring without a state change; \
                     the channel may have been shut down"
                );
                d.watch_failures = 0;
            }
        }

        let previous = to_connection_state(d.connectivity);
        let connectivity = channel.state(true);
        d.connectivity = connectivity;

        let current = to_connection_state(connectivity);
        if current != previous {
            announce = Some(current);
            if connectivity == Connectivity::Ready {
                for stream in d.streams.values_mut() {
                    if let Some(reader) = stream.start(&channel) {
                        stale_readers.push(reader);
                    }
                }
            } else {
                for stream in d.streams.values_mut() {
                    if let Some(reader) = stream.stop() {
                        stale_readers.push(reader);
                    }
                }
            }
        }

        let token = tagger.mint(NO_OWNER, TagLabel::ClientConnectionChange);
        channel.notify_on_state_change(d.connectivity, steady_deadline, queue, token);
    });

    for reader in stale_readers {
        let _ = reader.join();
    }
    if let (Some(state), Some(callback)) = (announce, on_state_change) {
        callback(state);
    }
}
