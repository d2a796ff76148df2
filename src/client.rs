//! Chunked call client.
//!
//! The [`ChunkedClient`] carries one logical call of arbitrary size over a
//! packet-limited [`CallPrimitive`]:
//! 1. Compress the request body
//! 2. Upload it in `maxChunkLength` slices on the reserved `$call` method
//! 3. Pull the response slices with `{handle}` envelopes until one arrives
//!    without a handle
//! 4. Decompress, and turn a non-success status into a [`StatusError`]
//!
//! # Example
//!
//! ```ignore
//! use chunkwire::client::{CallOptions, ChunkedClient, ClientConfig};
//!
//! let client = ChunkedClient::new(transport, ClientConfig::default());
//! let nodes = client
//!     .call_method("node-store", "uploadNodeSet", &body, "application/json", &CallOptions::new())
//!     .await?;
//! ```

use std::collections::HashMap;
use std::marker::PhantomData;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};

use crate::codec::{Codec, JsonCodec};
use crate::error::{ChunkwireError, Result, StatusError};
use crate::protocol::{
    chunk_count, compress, decompress, max_chunk_length, status, Envelope, ErrorBody,
    CHUNK_METHOD_NAME, CHUNK_RATIO,
};
use crate::trace::TraceContext;
use crate::transport::CallPrimitive;

/// Default per-call timeout, announced to the server as the session
/// inactivity timeout and applied to every transport call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Fraction of the transport packet limit used for payload bytes.
    pub chunk_ratio: f64,
    /// Timeout used when [`CallOptions`] names none.
    pub default_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            chunk_ratio: CHUNK_RATIO,
            default_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Set the chunk ratio.
    pub fn with_chunk_ratio(mut self, ratio: f64) -> Self {
        self.chunk_ratio = ratio;
        self
    }

    /// Set the default call timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Call timeout; the client default when absent.
    pub timeout: Option<Duration>,
    /// Token that aborts the call when cancelled.
    pub cancel: Option<CancellationToken>,
    /// Trace context of the caller; a new trace is started when absent.
    pub parent: Option<TraceContext>,
}

impl CallOptions {
    /// Options with every field defaulted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Abort the call when `token` is cancelled.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Continue the caller's trace.
    pub fn with_parent(mut self, parent: TraceContext) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// Client for chunked calls over a [`CallPrimitive`].
///
/// Envelopes are encoded with `C`; the server's engine must use the same codec.
pub struct ChunkedClient<T, C: Codec = JsonCodec> {
    transport: T,
    config: ClientConfig,
    _codec: PhantomData<fn() -> C>,
}

impl<T: CallPrimitive> ChunkedClient<T, JsonCodec> {
    /// Create a client speaking JSON envelopes.
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Self::with_codec(transport, config)
    }
}

impl<T: CallPrimitive, C: Codec> ChunkedClient<T, C> {
    /// Create a client speaking envelopes encoded with `C`.
    pub fn with_codec(transport: T, config: ClientConfig) -> Self {
        Self {
            transport,
            config,
            _codec: PhantomData,
        }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Largest payload slice this client puts in one envelope.
    pub fn max_chunk_length(&self) -> usize {
        max_chunk_length(self.transport.max_payload_size(), self.config.chunk_ratio)
    }

    /// Call `method` on `target` with a body of any size.
    ///
    /// # Errors
    ///
    /// - `Status` when the remote handler failed
    /// - `Protocol` when the server's replies break the chunk protocol
    /// - `Cancelled` when the options' token fires
    /// - transport errors unchanged
    pub async fn call_method(
        &self,
        target: &str,
        method: &str,
        payload: &[u8],
        content_type: &str,
        options: &CallOptions,
    ) -> Result<Bytes> {
        let trace = options
            .parent
            .as_ref()
            .map(TraceContext::child)
            .unwrap_or_else(TraceContext::new_root);
        let span = info_span!(
            "chunk_call",
            peer = target,
            method,
            trace_id = %trace.trace_id,
            span_id = %trace.span_id,
        );

        let call = self
            .drive(target, method, payload, content_type, options, &trace)
            .instrument(span);

        match &options.cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(peer = target, method, "chunked call cancelled");
                    Err(ChunkwireError::Cancelled)
                }
                result = call => result,
            },
            None => call.await,
        }
    }

    /// Typed call: encode `request` and decode the response with `C`.
    pub async fn call<Req, Resp>(
        &self,
        target: &str,
        method: &str,
        request: &Req,
        options: &CallOptions,
    ) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let payload = C::encode(request)?;
        let response = self
            .call_method(target, method, &payload, C::CONTENT_TYPE, options)
            .await?;
        C::decode(&response)
    }

    async fn drive(
        &self,
        target: &str,
        method: &str,
        payload: &[u8],
        content_type: &str,
        options: &CallOptions,
        trace: &TraceContext,
    ) -> Result<Bytes> {
        let payload: &[u8] = if payload.is_empty() { b" " } else { payload };
        let max_chunk = self.max_chunk_length();
        let timeout = options.timeout.unwrap_or(self.config.default_timeout);
        let body = Bytes::from(compress(payload)?);

        let mut properties = HashMap::new();
        trace.inject(&mut properties);

        debug!(
            len = payload.len(),
            compressed_len = body.len(),
            max_chunk,
            chunks = chunk_count(body.len(), max_chunk),
            "starting chunked call"
        );

        let mut response = ResponseBuffer::default();
        let mut handle: Option<String> = None;
        let mut offset = 0;

        // upload
        loop {
            let end = (offset + max_chunk).min(body.len());
            let slice = body.slice(offset..end);
            let envelope = match &handle {
                None => Envelope {
                    method_name: Some(method.to_string()),
                    content_type: Some(content_type.to_string()),
                    content_length: Some(body.len() as u64),
                    max_chunk_length: Some(max_chunk as u64),
                    timeout: Some(timeout.as_millis() as u64),
                    properties: Some(properties.clone()),
                    payload: Some(slice),
                    ..Envelope::default()
                },
                Some(h) => Envelope::continuation(h.clone(), slice),
            };
            offset = end;

            let reply = self.send(target, envelope, timeout).await?;
            response.absorb(&reply)?;

            match reply.handle {
                Some(next) => {
                    check_handle(handle.as_deref(), &next)?;
                    handle = Some(next);
                    if offset >= body.len() {
                        break;
                    }
                }
                None if offset >= body.len() => return self.finish(response),
                None => {
                    return Err(ChunkwireError::protocol(format!(
                        "Server ended the call with {} request bytes unsent",
                        body.len() - offset
                    )))
                }
            }
        }

        // pull
        while let Some(current) = handle.take() {
            let reply = self
                .send(target, Envelope::handle_only(current.clone()), timeout)
                .await?;
            let progressed = response.absorb(&reply)?;

            match reply.handle {
                None => break,
                Some(_) if !progressed => {
                    return Err(ChunkwireError::protocol(format!(
                        "Pull on session {current} returned no data"
                    )))
                }
                Some(next) => {
                    check_handle(Some(&current), &next)?;
                    handle = Some(next);
                }
            }
        }

        self.finish(response)
    }

    async fn send(&self, target: &str, envelope: Envelope, timeout: Duration) -> Result<Envelope> {
        let request = Bytes::from(C::encode(&envelope)?);
        let reply = self
            .transport
            .call(target, CHUNK_METHOD_NAME, request, C::CONTENT_TYPE, Some(timeout))
            .await?;
        C::decode(&reply)
    }

    fn finish(&self, response: ResponseBuffer) -> Result<Bytes> {
        if let Some(expected) = response.content_length {
            if response.body.len() as u64 != expected {
                return Err(ChunkwireError::protocol(format!(
                    "Response announced {} bytes but {} arrived",
                    expected,
                    response.body.len()
                )));
            }
        }

        let code = response.status.unwrap_or(status::OK);
        let body = if response.body.is_empty() {
            Bytes::new()
        } else {
            Bytes::from(decompress(&response.body)?)
        };
        debug!(status = code, len = body.len(), "chunked call complete");

        if status::is_success(code) {
            return Ok(body);
        }

        let error_body = if body.is_empty() {
            ErrorBody::new(format!("Remote handler failed with status {code}"))
        } else {
            C::decode(&body).unwrap_or_else(|_| ErrorBody::new(String::from_utf8_lossy(&body)))
        };
        Err(StatusError {
            status: code,
            body: error_body,
            payload: body,
        }
        .into())
    }
}

impl<T, C: Codec> std::fmt::Debug for ChunkedClient<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedClient")
            .field("config", &self.config)
            .field("codec", &C::CONTENT_TYPE)
            .finish()
    }
}

/// Response bytes collected across replies.
#[derive(Debug, Default)]
struct ResponseBuffer {
    body: BytesMut,
    content_length: Option<u64>,
    status: Option<i32>,
}

impl ResponseBuffer {
    /// Take in one reply. Returns whether it carried payload bytes.
    fn absorb(&mut self, reply: &Envelope) -> Result<bool> {
        if let Some(len) = reply.content_length {
            match self.content_length {
                Some(previous) if previous != len => {
                    return Err(ChunkwireError::protocol(format!(
                        "Response contentLength changed from {previous} to {len}"
                    )))
                }
                _ => self.content_length = Some(len),
            }
        }
        if reply.status.is_some() {
            self.status = reply.status;
        }

        let payload = reply.payload_slice();
        if let Some(expected) = self.content_length {
            if (self.body.len() + payload.len()) as u64 > expected {
                return Err(ChunkwireError::protocol(format!(
                    "Response exceeds announced contentLength {expected}"
                )));
            }
        }
        self.body.extend_from_slice(payload);
        Ok(!payload.is_empty())
    }
}

fn check_handle(current: Option<&str>, next: &str) -> Result<()> {
    match current {
        Some(current) if current != next => Err(ChunkwireError::protocol(format!(
            "Server switched session from {current} to {next}"
        ))),
        _ => Ok(()),
    }
}
