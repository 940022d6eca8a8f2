//! Typed method descriptors.
//!
//! Stub generation is out of scope, so services declare their methods as
//! `const` descriptors binding a wire name to request and response types:
//!
//! ```
//! use rpcq::{ServerStreamMethod, UnaryMethod};
//!
//! const ECHO: UnaryMethod<String, String> = UnaryMethod::new("test.Echo");
//! const TICKS: ServerStreamMethod<(), u64> = ServerStreamMethod::new("test.Ticks");
//! # let _ = (ECHO.name, TICKS.name);
//! ```

use std::marker::PhantomData;

/// A unary RPC method: one request, one response.
pub struct UnaryMethod<Req, Resp> {
    pub name: &'static str,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> UnaryMethod<Req, Resp> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }
}

/// A server-streaming RPC method: one request, a stream of updates.
pub struct ServerStreamMethod<Req, Resp> {
    pub name: &'static str,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> ServerStreamMethod<Req, Resp> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }
}

impl<Req, Resp> Clone for UnaryMethod<Req, Resp> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<Req, Resp> Copy for UnaryMethod<Req, Resp> {}

impl<Req, Resp> Clone for ServerStreamMethod<Req, Resp> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<Req, Resp> Copy for ServerStreamMethod<Req, Resp> {}
