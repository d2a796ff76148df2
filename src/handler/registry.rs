//! Dispatch table mapping method names to invokers.
//!
//! The [`Dispatcher`] is a case-insensitive name→invoker table. It always
//! owns one reserved entry, [`CHUNK_METHOD_NAME`], bound to the chunk
//! session engine at construction; every other name is an ordinary
//! single-shot invoker. Names with no entry go to a fallback dispatcher,
//! which by default fails with `InvokerNotRegistered`.
//!
//! # Example
//!
//! ```ignore
//! use chunkwire::handler::Dispatcher;
//! use chunkwire::session::ChunkSessionEngine;
//!
//! let dispatcher = Dispatcher::new(ChunkSessionEngine::new(Default::default()));
//!
//! dispatcher.register_fn("echo", |payload, _content_type, _ctx| async move {
//!     Ok(payload)
//! })?;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::InvokeContext;
use crate::codec::Codec;
use crate::error::{ChunkwireError, Result};
use crate::protocol::CHUNK_METHOD_NAME;
use crate::trace::TraceContext;

/// Boxed future for invoker results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A named, dispatchable unit turning a raw request payload into a raw
/// response payload.
pub trait Invoker: Send + Sync + 'static {
    /// Invoke with raw payload bytes and their content type.
    fn invoke(
        &self,
        payload: Bytes,
        content_type: String,
        ctx: InvokeContext,
    ) -> BoxFuture<'static, Result<Bytes>>;
}

/// Generic dispatch-by-name surface.
pub trait Dispatch: Send + Sync + 'static {
    /// Dispatch a call to the invoker registered for `method`.
    fn dispatch(
        self: Arc<Self>,
        method: &str,
        payload: Bytes,
        content_type: &str,
        trace: Option<TraceContext>,
    ) -> BoxFuture<'static, Result<Bytes>>;
}

/// Invoker backed by a closure over raw bytes.
pub struct FnInvoker<F> {
    handler: F,
}

impl<F, Fut> FnInvoker<F>
where
    F: Fn(Bytes, String, InvokeContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes>> + Send + 'static,
{
    /// Create a new closure invoker.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F, Fut> Invoker for FnInvoker<F>
where
    F: Fn(Bytes, String, InvokeContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes>> + Send + 'static,
{
    fn invoke(
        &self,
        payload: Bytes,
        content_type: String,
        ctx: InvokeContext,
    ) -> BoxFuture<'static, Result<Bytes>> {
        Box::pin((self.handler)(payload, content_type, ctx))
    }
}

/// Wrapper that decodes the request and encodes the response with codec `C`.
pub struct TypedInvoker<C, F, Req, Resp, Fut>
where
    C: Codec,
    F: Fn(Req, InvokeContext) -> Fut + Send + Sync + 'static,
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    Fut: Future<Output = Result<Resp>> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(C, Req) -> (Fut, Resp)>,
}

impl<C, F, Req, Resp, Fut> TypedInvoker<C, F, Req, Resp, Fut>
where
    C: Codec,
    F: Fn(Req, InvokeContext) -> Fut + Send + Sync + 'static,
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    Fut: Future<Output = Result<Resp>> + Send + 'static,
{
    /// Create a new typed invoker.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<C, F, Req, Resp, Fut> Invoker for TypedInvoker<C, F, Req, Resp, Fut>
where
    C: Codec,
    F: Fn(Req, InvokeContext) -> Fut + Send + Sync + 'static,
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    Fut: Future<Output = Result<Resp>> + Send + 'static,
{
    fn invoke(
        &self,
        payload: Bytes,
        _content_type: String,
        ctx: InvokeContext,
    ) -> BoxFuture<'static, Result<Bytes>> {
        let request: Req = match C::decode(&payload) {
            Ok(v) => v,
            Err(e) => return Box::pin(async move { Err(e) }),
        };

        let fut = (self.handler)(request, ctx);
        Box::pin(async move {
            let response = fut.await?;
            Ok(Bytes::from(C::encode(&response)?))
        })
    }
}

/// Fallback used when no fallback is configured.
struct NotRegistered;

impl Dispatch for NotRegistered {
    fn dispatch(
        self: Arc<Self>,
        method: &str,
        _payload: Bytes,
        _content_type: &str,
        _trace: Option<TraceContext>,
    ) -> BoxFuture<'static, Result<Bytes>> {
        let method = method.to_string();
        Box::pin(async move { Err(ChunkwireError::InvokerNotRegistered(method)) })
    }
}

/// Case-insensitive dispatch table with the reserved chunk-protocol entry.
pub struct Dispatcher {
    /// Invokers keyed by lowercased method name.
    invokers: RwLock<HashMap<String, Arc<dyn Invoker>>>,
    /// Destination for names with no entry.
    fallback: Arc<dyn Dispatch>,
}

impl Dispatcher {
    /// Create a dispatcher with the chunk session engine bound to `$call`.
    pub fn new<I: Invoker>(chunk_engine: I) -> Arc<Self> {
        Self::with_fallback(chunk_engine, Arc::new(NotRegistered))
    }

    /// Create a dispatcher that forwards unknown names to `fallback`.
    pub fn with_fallback<I: Invoker>(chunk_engine: I, fallback: Arc<dyn Dispatch>) -> Arc<Self> {
        let mut invokers: HashMap<String, Arc<dyn Invoker>> = HashMap::new();
        invokers.insert(normalize(CHUNK_METHOD_NAME), Arc::new(chunk_engine));
        Arc::new(Self {
            invokers: RwLock::new(invokers),
            fallback,
        })
    }

    /// Register an invoker under `name`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns a protocol error for the reserved name.
    pub fn register<I: Invoker>(&self, name: &str, invoker: I) -> Result<()> {
        self.register_arc(name, Arc::new(invoker))
    }

    /// Register a shared invoker under `name`.
    pub fn register_arc(&self, name: &str, invoker: Arc<dyn Invoker>) -> Result<()> {
        let key = normalize(name);
        if key == normalize(CHUNK_METHOD_NAME) {
            return Err(ChunkwireError::protocol(format!(
                "Method name {name} is reserved"
            )));
        }
        self.invokers.write().insert(key, invoker);
        Ok(())
    }

    /// Register a closure over raw bytes.
    pub fn register_fn<F, Fut>(&self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(Bytes, String, InvokeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        self.register(name, FnInvoker::new(handler))
    }

    /// Register a typed closure; payloads are decoded/encoded with `C`.
    pub fn register_typed<C, Req, Resp, F, Fut>(&self, name: &str, handler: F) -> Result<()>
    where
        C: Codec,
        F: Fn(Req, InvokeContext) -> Fut + Send + Sync + 'static,
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        Fut: Future<Output = Result<Resp>> + Send + 'static,
    {
        self.register(name, TypedInvoker::<C, F, Req, Resp, Fut>::new(handler))
    }

    /// Remove the invoker under `name`. The reserved entry cannot be removed.
    pub fn remove(&self, name: &str) -> bool {
        let key = normalize(name);
        if key == normalize(CHUNK_METHOD_NAME) {
            return false;
        }
        self.invokers.write().remove(&key).is_some()
    }

    /// Check whether an invoker is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.invokers.read().contains_key(&normalize(name))
    }

    /// Number of registered invokers, including the reserved one.
    pub fn len(&self) -> usize {
        self.invokers.read().len()
    }

    /// Always false: the reserved entry is always present.
    pub fn is_empty(&self) -> bool {
        self.invokers.read().is_empty()
    }

    fn lookup(&self, name: &str) -> Option<Arc<dyn Invoker>> {
        self.invokers.read().get(&normalize(name)).cloned()
    }
}

impl Dispatch for Dispatcher {
    fn dispatch(
        self: Arc<Self>,
        method: &str,
        payload: Bytes,
        content_type: &str,
        trace: Option<TraceContext>,
    ) -> BoxFuture<'static, Result<Bytes>> {
        match self.lookup(method) {
            Some(invoker) => {
                tracing::trace!(method, "dispatching to registered invoker");
                let ctx = InvokeContext::with_dispatcher(self, trace);
                invoker.invoke(payload, content_type.to_string(), ctx)
            }
            None => {
                tracing::debug!(method, "no invoker registered, using fallback");
                self.fallback
                    .clone()
                    .dispatch(method, payload, content_type, trace)
            }
        }
    }
}

fn normalize(name: &str) -> String {
    name.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::error::StatusError;

    /// Stand-in for the session engine.
    struct Reserved;

    impl Invoker for Reserved {
        fn invoke(
            &self,
            _payload: Bytes,
            _content_type: String,
            _ctx: InvokeContext,
        ) -> BoxFuture<'static, Result<Bytes>> {
            Box::pin(async { Ok(Bytes::from_static(b"chunked")) })
        }
    }

    fn reserved() -> Reserved {
        Reserved
    }

    async fn dispatch(d: &Arc<Dispatcher>, method: &str, payload: &'static [u8]) -> Result<Bytes> {
        d.clone()
            .dispatch(method, Bytes::from_static(payload), "application/json", None)
            .await
    }

    #[tokio::test]
    async fn test_reserved_entry_registered() {
        let d = Dispatcher::new(reserved());
        assert!(d.contains(CHUNK_METHOD_NAME));
        assert_eq!(d.len(), 1);
        assert!(!d.is_empty());
        assert_eq!(dispatch(&d, "$call", b"").await.unwrap(), "chunked");
    }

    #[tokio::test]
    async fn test_lookup_is_case_insensitive() {
        let d = Dispatcher::new(reserved());
        d.register_fn("GetNodes", |_p, _ct, _ctx| async { Ok(Bytes::from_static(b"nodes")) })
            .unwrap();

        assert!(d.contains("getnodes"));
        assert_eq!(dispatch(&d, "GETNODES", b"").await.unwrap(), "nodes");
        assert_eq!(dispatch(&d, "$CALL", b"").await.unwrap(), "chunked");
    }

    #[tokio::test]
    async fn test_missing_invoker_fails_by_default() {
        let d = Dispatcher::new(reserved());
        let err = dispatch(&d, "nope", b"").await.unwrap_err();
        assert!(matches!(err, ChunkwireError::InvokerNotRegistered(m) if m == "nope"));
    }

    #[tokio::test]
    async fn test_fallback_receives_unknown_names() {
        let fallback = Dispatcher::new(reserved());
        fallback
            .register_fn("legacy", |p, _ct, _ctx| async move { Ok(p) })
            .unwrap();

        let d = Dispatcher::with_fallback(reserved(), fallback);
        assert!(!d.contains("legacy"));
        assert_eq!(dispatch(&d, "legacy", b"through").await.unwrap(), "through");
    }

    #[test]
    fn test_reserved_name_cannot_be_replaced_or_removed() {
        let d = Dispatcher::new(reserved());
        let err = d
            .register_fn("$Call", |p, _ct, _ctx| async move { Ok(p) })
            .unwrap_err();
        assert!(matches!(err, ChunkwireError::Protocol(_)));
        assert!(!d.remove("$call"));
        assert!(d.contains("$call"));
    }

    #[test]
    fn test_add_remove_contains() {
        let d = Dispatcher::new(reserved());
        d.register_fn("a", |p, _ct, _ctx| async move { Ok(p) }).unwrap();
        d.register_fn("b", |p, _ct, _ctx| async move { Ok(p) }).unwrap();
        assert_eq!(d.len(), 3);

        assert!(d.remove("A"));
        assert!(!d.remove("a"));
        assert!(!d.contains("a"));
        assert!(d.contains("b"));
        assert_eq!(d.len(), 2);
    }

    #[tokio::test]
    async fn test_invoker_can_dispatch_through_context() {
        let d = Dispatcher::new(reserved());
        d.register_fn("inner", |_p, _ct, _ctx| async { Ok(Bytes::from_static(b"inner result")) })
            .unwrap();
        d.register_fn("outer", |p, ct, ctx: InvokeContext| async move {
            ctx.dispatch("inner", p, &ct).await
        })
        .unwrap();

        assert_eq!(dispatch(&d, "outer", b"").await.unwrap(), "inner result");
    }

    #[tokio::test]
    async fn test_typed_invoker() {
        #[derive(serde::Deserialize)]
        struct Add {
            a: i64,
            b: i64,
        }

        let d = Dispatcher::new(reserved());
        d.register_typed::<JsonCodec, _, _, _, _>("add", |req: Add, _ctx| async move {
            Ok(req.a + req.b)
        })
        .unwrap();

        let out = dispatch(&d, "add", br#"{"a":2,"b":40}"#).await.unwrap();
        assert_eq!(out, "42");
    }

    #[tokio::test]
    async fn test_typed_invoker_decode_error() {
        let d = Dispatcher::new(reserved());
        d.register_typed::<JsonCodec, _, _, _, _>("count", |req: Vec<u32>, _ctx| async move {
            Ok(req.len())
        })
        .unwrap();

        let err = dispatch(&d, "count", b"not json").await.unwrap_err();
        assert!(matches!(err, ChunkwireError::Json(_)));
    }

    #[tokio::test]
    async fn test_status_error_passes_through() {
        let d = Dispatcher::new(reserved());
        d.register_fn("deny", |_p, _ct, _ctx| async {
            Err(StatusError::new(403, "forbidden").into())
        })
        .unwrap();

        let err = dispatch(&d, "deny", b"").await.unwrap_err();
        assert_eq!(err.status_code(), 403);
    }
}
