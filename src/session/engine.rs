//! Server side of the chunk protocol.
//!
//! The [`ChunkSessionEngine`] is the invoker bound to `$call`. It turns a
//! sequence of envelopes into one call of the real target method:
//!
//! 1. The first chunk (no handle) opens a session and allocates a handle.
//! 2. Request slices are copied into the session's receive buffer; each
//!    incomplete step is answered with `{handle}`.
//! 3. Once the buffer is full the body is decompressed and dispatched by
//!    name through the [`InvokeContext`] the envelope arrived with.
//! 4. The compressed response is streamed back one slice per envelope; the
//!    last slice carries no handle and the session is removed.
//!
//! Sessions idle for longer than their timeout are reclaimed by
//! [`ChunkSessionEngine::sweep`], run periodically by the task started with
//! [`ChunkSessionEngine::spawn_sweeper`].

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use super::state::{CallInfo, Session};
use super::table::{SessionLease, SessionTable};
use crate::codec::{Codec, JsonCodec};
use crate::error::{ChunkwireError, Result};
use crate::handler::{BoxFuture, InvokeContext, Invoker};
use crate::protocol::{
    compress, decompress_bounded, status, Envelope, CHUNK_METHOD_NAME, DEFAULT_CONTENT_TYPE,
    DEFAULT_MAX_DECOMPRESSED_LENGTH,
};
use crate::trace::TraceContext;

/// Default inactivity timeout for sessions whose first chunk names none.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default period of the idle-session sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Default response slice size when the first chunk names none.
pub const DEFAULT_MAX_CHUNK_LENGTH: usize = 86_507;

/// Default upper bound on an announced request length (64 MiB).
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 64 * 1024 * 1024;

/// Default number of session table shards.
pub const DEFAULT_SHARD_COUNT: usize = 16;

/// Configuration for the session engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Inactivity timeout when the first chunk carries none.
    pub default_timeout: Duration,
    /// How often idle sessions are swept.
    pub sweep_interval: Duration,
    /// Response slice size when the first chunk carries none.
    pub default_max_chunk_length: usize,
    /// Largest request (compressed) a session will buffer.
    pub max_content_length: usize,
    /// Largest request body after decompression.
    pub max_request_length: usize,
    /// Number of independently locked table shards.
    pub shard_count: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_SESSION_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            default_max_chunk_length: DEFAULT_MAX_CHUNK_LENGTH,
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            max_request_length: DEFAULT_MAX_DECOMPRESSED_LENGTH,
            shard_count: DEFAULT_SHARD_COUNT,
        }
    }
}

impl EngineConfig {
    /// Set the default inactivity timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Set the sweep period.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the default response slice size.
    pub fn with_default_max_chunk_length(mut self, len: usize) -> Self {
        self.default_max_chunk_length = len;
        self
    }

    /// Set the largest accepted request length.
    pub fn with_max_content_length(mut self, len: usize) -> Self {
        self.max_content_length = len;
        self
    }

    /// Set the largest accepted request length after decompression.
    pub fn with_max_request_length(mut self, len: usize) -> Self {
        self.max_request_length = len;
        self
    }

    /// Set the number of table shards.
    pub fn with_shard_count(mut self, count: usize) -> Self {
        self.shard_count = count;
        self
    }
}

struct EngineInner {
    config: EngineConfig,
    table: SessionTable,
}

impl EngineInner {
    fn sweep(&self) -> usize {
        let removed = self.table.sweep(Instant::now());
        for handle in &removed {
            info!(handle = %handle, "evicted idle chunk session");
        }
        removed.len()
    }
}

/// Session engine serving the reserved `$call` method.
///
/// Envelopes are decoded and encoded with `C` when the engine is used as an
/// [`Invoker`]. Clones share the same session table.
pub struct ChunkSessionEngine<C: Codec = JsonCodec> {
    inner: Arc<EngineInner>,
    _codec: PhantomData<fn() -> C>,
}

impl<C: Codec> Clone for ChunkSessionEngine<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _codec: PhantomData,
        }
    }
}

impl ChunkSessionEngine<JsonCodec> {
    /// Create an engine speaking JSON envelopes.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_codec(config)
    }
}

impl<C: Codec> ChunkSessionEngine<C> {
    /// Create an engine speaking envelopes encoded with `C`.
    pub fn with_codec(config: EngineConfig) -> Self {
        let table = SessionTable::new(config.shard_count);
        Self {
            inner: Arc::new(EngineInner { config, table }),
            _codec: PhantomData,
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.inner.table.len()
    }

    /// Whether a session exists for `handle`.
    pub fn contains_session(&self, handle: &str) -> bool {
        self.inner.table.contains(handle)
    }

    /// Remove idle sessions now. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    /// Start the periodic sweep.
    ///
    /// The task stops when `cancel` fires or when every engine clone has
    /// been dropped.
    pub fn spawn_sweeper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);
        let period = self.inner.config.sweep_interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = inner.upgrade() else { break };
                        inner.sweep();
                    }
                }
            }
            debug!("chunk session sweeper stopped");
        })
    }

    /// Process one request envelope and produce the reply envelope.
    ///
    /// # Errors
    ///
    /// Protocol errors for malformed envelopes, `UnknownHandle` for a
    /// continuation naming no live session. Handler failures are not errors
    /// here; they are delivered to the client as a status.
    pub async fn process(&self, envelope: Envelope, ctx: InvokeContext) -> Result<Envelope> {
        let lease = match envelope.handle.as_deref() {
            None => self.open(&envelope)?,
            Some(handle) => self.inner.table.checkout(handle)?,
        };
        self.advance(lease, envelope.payload_slice(), ctx).await
    }

    fn open(&self, envelope: &Envelope) -> Result<SessionLease<'_>> {
        let config = &self.inner.config;

        let method = envelope
            .method_name
            .as_deref()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| ChunkwireError::protocol("First chunk has no methodName"))?;
        if method.eq_ignore_ascii_case(CHUNK_METHOD_NAME) {
            return Err(ChunkwireError::protocol(format!(
                "Chunked call cannot target {CHUNK_METHOD_NAME}"
            )));
        }

        let content_length = match envelope.content_length {
            None | Some(0) => {
                return Err(ChunkwireError::protocol(
                    "First chunk needs a positive contentLength",
                ))
            }
            Some(len) => usize::try_from(len).unwrap_or(usize::MAX),
        };
        if content_length > config.max_content_length {
            return Err(ChunkwireError::protocol(format!(
                "contentLength {} exceeds maximum {}",
                content_length, config.max_content_length
            )));
        }
        if envelope.payload_slice().len() > content_length {
            return Err(ChunkwireError::protocol(format!(
                "First chunk of {} bytes overflows announced length {}",
                envelope.payload_slice().len(),
                content_length
            )));
        }

        let max_chunk_length = envelope
            .max_chunk_length
            .map(|len| usize::try_from(len).unwrap_or(usize::MAX))
            .unwrap_or(config.default_max_chunk_length);
        let timeout = envelope
            .timeout_duration()
            .unwrap_or(config.default_timeout);

        let info = CallInfo {
            method: method.to_string(),
            content_type: envelope
                .content_type
                .clone()
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            properties: envelope.properties.clone().unwrap_or_default(),
        };

        let handle = self.inner.table.allocate_handle();
        debug!(
            handle = %handle,
            method,
            content_length,
            max_chunk_length,
            timeout_ms = timeout.as_millis() as u64,
            "opened chunk session"
        );
        let session = Session::new(handle, info, content_length, max_chunk_length, timeout);
        Ok(self.inner.table.insert(session))
    }

    async fn advance(
        &self,
        lease: SessionLease<'_>,
        payload: &[u8],
        ctx: InvokeContext,
    ) -> Result<Envelope> {
        let request = {
            let mut session = lease.session();
            if session.is_receiving() {
                if !session.receive(payload)? {
                    return Ok(Envelope::handle_only(lease.handle()));
                }
                Some((session.begin_invoke()?, session.info().clone()))
            } else if !payload.is_empty() {
                return Err(ChunkwireError::protocol(format!(
                    "Session {} received payload after the request was complete",
                    lease.handle()
                )));
            } else {
                None
            }
        };

        if let Some((body, info)) = request {
            let (buffer, code) = self.run_handler(lease.handle(), &info, body, ctx).await?;
            lease.session().begin_sending(buffer, code)?;
        }

        self.send_next(lease)
    }

    /// Run the real handler and produce the compressed send buffer and status.
    async fn run_handler(
        &self,
        handle: &str,
        info: &CallInfo,
        body: Vec<u8>,
        ctx: InvokeContext,
    ) -> Result<(Bytes, i32)> {
        let trace = TraceContext::extract(&info.properties)
            .map(|parent| parent.child())
            .unwrap_or_else(TraceContext::new_root);
        let span = info_span!(
            "chunk_invoke",
            handle = %handle,
            method = %info.method,
            trace_id = %trace.trace_id,
            span_id = %trace.span_id,
        );

        let outcome = async {
            let request = decompress_bounded(&body, self.inner.config.max_request_length)?;
            let request = Bytes::from(request);
            ctx.with_trace(trace)
                .dispatch(&info.method, request, &info.content_type)
                .await
        }
        .instrument(span.clone())
        .await;

        span.in_scope(|| -> Result<(Bytes, i32)> {
            match outcome {
                Ok(response) => {
                    debug!(response_len = response.len(), "handler succeeded");
                    Ok((Bytes::from(compress(&response)?), status::OK))
                }
                Err(ChunkwireError::Status(err)) => {
                    debug!(
                        status = err.status,
                        message = %err.body.message,
                        "handler returned status"
                    );
                    let body = compress(&C::encode(&err.body)?)?;
                    Ok((Bytes::from(body), err.status))
                }
                Err(err) => {
                    error!(error = %err, "handler failed");
                    Ok((Bytes::new(), status::INTERNAL_SERVER_ERROR))
                }
            }
        })
    }

    fn send_next(&self, lease: SessionLease<'_>) -> Result<Envelope> {
        let slice = lease.session().next_slice()?;

        let mut reply = Envelope {
            content_length: slice.content_length,
            payload: (!slice.payload.is_empty()).then_some(slice.payload),
            ..Envelope::default()
        };
        if !status::is_success(slice.status) && (slice.first || slice.last) {
            reply.status = Some(slice.status);
        }

        if slice.last {
            debug!(handle = %lease.handle(), "chunk session complete");
            lease.complete();
        } else {
            reply.handle = Some(lease.handle().to_string());
        }
        Ok(reply)
    }
}

impl<C: Codec> Invoker for ChunkSessionEngine<C> {
    fn invoke(
        &self,
        payload: Bytes,
        _content_type: String,
        ctx: InvokeContext,
    ) -> BoxFuture<'static, Result<Bytes>> {
        let engine = self.clone();
        Box::pin(async move {
            let envelope: Envelope = C::decode(&payload)?;
            let reply = engine.process(envelope, ctx).await?;
            Ok(Bytes::from(C::encode(&reply)?))
        })
    }
}

impl<C: Codec> std::fmt::Debug for ChunkSessionEngine<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkSessionEngine")
            .field("config", &self.inner.config)
            .field("sessions", &self.inner.table.len())
            .finish()
    }
}
