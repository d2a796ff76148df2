//! Invocation context for invokers.
//!
//! Carries:
//! - the dispatcher the invocation arrived through, so an invoker can
//!   dispatch further calls by name (the chunk session engine dispatches
//!   the real target method this way once a request is reassembled)
//! - the trace context of the current invocation
//!
//! # Example
//!
//! ```ignore
//! async fn forward(payload: Bytes, content_type: String, ctx: InvokeContext) -> Result<Bytes> {
//!     ctx.dispatch("backend.echo", payload, &content_type).await
//! }
//! ```

use std::sync::Arc;

use bytes::Bytes;

use super::registry::Dispatch;
use crate::error::{ChunkwireError, Result};
use crate::trace::TraceContext;

/// Context passed to invokers.
///
/// `InvokeContext` is `Clone` and cheap to copy into spawned tasks.
#[derive(Clone, Default)]
pub struct InvokeContext {
    /// Dispatcher the call arrived through.
    dispatcher: Option<Arc<dyn Dispatch>>,
    /// Trace context of this invocation.
    trace: Option<TraceContext>,
}

impl InvokeContext {
    /// Create a context without a dispatcher (for testing).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context bound to a dispatcher.
    pub fn with_dispatcher(dispatcher: Arc<dyn Dispatch>, trace: Option<TraceContext>) -> Self {
        Self {
            dispatcher: Some(dispatcher),
            trace,
        }
    }

    /// Same dispatcher, different trace context.
    pub fn with_trace(&self, trace: TraceContext) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
            trace: Some(trace),
        }
    }

    /// Get the trace context, if any.
    #[inline]
    pub fn trace(&self) -> Option<&TraceContext> {
        self.trace.as_ref()
    }

    /// Get the dispatcher, if any.
    #[inline]
    pub fn dispatcher(&self) -> Option<&Arc<dyn Dispatch>> {
        self.dispatcher.as_ref()
    }

    /// Dispatch a call by method name through the bound dispatcher.
    ///
    /// # Errors
    ///
    /// Fails with `InvokerNotRegistered` when no dispatcher is bound, and
    /// otherwise with whatever the target invoker returns.
    pub async fn dispatch(
        &self,
        method: &str,
        payload: Bytes,
        content_type: &str,
    ) -> Result<Bytes> {
        let dispatcher = self
            .dispatcher
            .clone()
            .ok_or_else(|| ChunkwireError::InvokerNotRegistered(method.to_string()))?;
        dispatcher
            .dispatch(method, payload, content_type, self.trace.clone())
            .await
    }
}

impl std::fmt::Debug for InvokeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvokeContext")
            .field("has_dispatcher", &self.dispatcher.is_some())
            .field("trace", &self.trace)
            .finish()
    }
}
