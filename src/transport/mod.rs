//! Transport module - the single-shot call primitive chunked calls ride on.
//!
//! A [`CallPrimitive`] sends one bounded request to a named method on a
//! target and returns one bounded response. It knows nothing about chunks;
//! the [`ChunkedClient`](crate::client::ChunkedClient) splits large calls to
//! fit under [`CallPrimitive::max_payload_size`].
//!
//! [`LocalTransport`] is an in-process implementation backed by a
//! [`Dispatch`](crate::handler::Dispatch) surface.

mod local;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;
use crate::handler::BoxFuture;

pub use local::LocalTransport;

/// Single-shot request/response over a packet-limited transport.
pub trait CallPrimitive: Send + Sync {
    /// Largest request or response payload the transport accepts.
    fn max_payload_size(&self) -> usize;

    /// Call `method` on `target` with one payload.
    ///
    /// Transport failures are returned unchanged to the chunked client.
    fn call<'a>(
        &'a self,
        target: &'a str,
        method: &'a str,
        payload: Bytes,
        content_type: &'a str,
        timeout: Option<Duration>,
    ) -> BoxFuture<'a, Result<Bytes>>;
}

impl<T: CallPrimitive + ?Sized> CallPrimitive for Arc<T> {
    fn max_payload_size(&self) -> usize {
        (**self).max_payload_size()
    }

    fn call<'a>(
        &'a self,
        target: &'a str,
        method: &'a str,
        payload: Bytes,
        content_type: &'a str,
        timeout: Option<Duration>,
    ) -> BoxFuture<'a, Result<Bytes>> {
        (**self).call(target, method, payload, content_type, timeout)
    }
}
