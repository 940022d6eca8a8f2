//! The client-side unary call handle.

use crate::codec::{self, Message};
use crate::runtime::UnaryReceiver;
use crate::status::Status;
use std::sync::Arc;

/// One in-flight client RPC, dispatched by the worker after its tag is
/// redeemed. Consuming `complete` makes the terminal callback structurally
/// single-shot.
pub(crate) trait ClientRpc: Send {
    fn complete(self: Box<Self>, success: bool);
}

/// Single-shot unary call: response receiver plus the user's completion
/// callback.
pub(crate) struct UnaryClientCall<Resp> {
    receiver: Arc<dyn UnaryReceiver>,
    on_finish: Box<dyn FnOnce(Status, Option<Resp>) + Send>,
}

impl<Resp> UnaryClientCall<Resp> {
    pub(crate) fn new(
        receiver: Arc<dyn UnaryReceiver>,
        on_finish: Box<dyn FnOnce(Status, Option<Resp>) + Send>,
    ) -> Self {
        Self {
            receiver,
            on_finish,
        }
    }
}

impl<Resp: Message> ClientRpc for UnaryClientCall<Resp> {
    fn complete(self: Box<Self>, success: bool) {
        let (status, response) = if success {
            let (status, bytes) = self.receiver.take();
            if status.is_ok() {
                match codec::decode::<Resp>(&bytes) {
                    Ok(response) => (status, Some(response)),
                    Err(decode_status) => (decode_status, None),
                }
            } else {
                (status, None)
            }
        } else {
            (Status::cancelled("call dropped before completion"), None)
        };
        (self.on_finish)(status, response);
    }
}
