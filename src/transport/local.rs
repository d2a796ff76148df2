//! In-process transport over a dispatch surface.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::trace;

use super::CallPrimitive;
use crate::error::{ChunkwireError, Result};
use crate::handler::{BoxFuture, Dispatch};
use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;

/// Transport that dispatches calls directly to an in-process [`Dispatch`].
///
/// Enforces the packet limit in both directions the way a broker would,
/// so chunking behaves exactly as it would over the wire.
pub struct LocalTransport {
    dispatcher: Arc<dyn Dispatch>,
    max_payload_size: usize,
    calls: AtomicU64,
}

impl LocalTransport {
    /// Create a transport with the default 128 KiB packet limit.
    pub fn new(dispatcher: Arc<dyn Dispatch>) -> Self {
        Self::with_max_payload_size(dispatcher, DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a transport with a custom packet limit.
    pub fn with_max_payload_size(dispatcher: Arc<dyn Dispatch>, max_payload_size: usize) -> Self {
        Self {
            dispatcher,
            max_payload_size,
            calls: AtomicU64::new(0),
        }
    }

    /// Number of calls made through this transport.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn check_size(&self, direction: &str, len: usize) -> Result<()> {
        if len > self.max_payload_size {
            return Err(ChunkwireError::Transport(format!(
                "{} of {} bytes exceeds packet limit {}",
                direction, len, self.max_payload_size
            )));
        }
        Ok(())
    }
}

impl CallPrimitive for LocalTransport {
    fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    fn call<'a>(
        &'a self,
        target: &'a str,
        method: &'a str,
        payload: Bytes,
        content_type: &'a str,
        timeout: Option<Duration>,
    ) -> BoxFuture<'a, Result<Bytes>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.check_size("Request", payload.len())?;
            trace!(peer = target, method, len = payload.len(), "local call");

            let call = self
                .dispatcher
                .clone()
                .dispatch(method, payload, content_type, None);
            let response = match timeout {
                Some(limit) => tokio::time::timeout(limit, call)
                    .await
                    .map_err(|_| ChunkwireError::Timeout)??,
                None => call.await?,
            };

            self.check_size("Response", response.len())?;
            Ok(response)
        })
    }
}

impl std::fmt::Debug for LocalTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTransport")
            .field("max_payload_size", &self.max_payload_size)
            .field("calls", &self.call_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Dispatcher;
    use crate::session::{ChunkSessionEngine, EngineConfig};

    fn dispatcher() -> Arc<Dispatcher> {
        let d = Dispatcher::new(ChunkSessionEngine::new(EngineConfig::default()));
        d.register_fn("echo", |p, _ct, _ctx| async move { Ok(p) }).unwrap();
        d.register_fn("grow", |p, _ct, _ctx| async move {
            Ok(Bytes::from(p.repeat(4)))
        })
        .unwrap();
        d.register_fn("slow", |p, _ct, _ctx| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(p)
        })
        .unwrap();
        d
    }

    #[tokio::test]
    async fn test_call_dispatches() {
        let transport = LocalTransport::new(dispatcher());
        let out = transport
            .call("svc", "echo", Bytes::from_static(b"hi"), "text/plain", None)
            .await
            .unwrap();
        assert_eq!(out, "hi");
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_packet_limit_both_directions() {
        let transport = LocalTransport::with_max_payload_size(dispatcher(), 8);

        let err = transport
            .call("svc", "echo", Bytes::from_static(b"123456789"), "text/plain", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChunkwireError::Transport(_)));

        let err = transport
            .call("svc", "grow", Bytes::from_static(b"123"), "text/plain", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChunkwireError::Transport(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let transport = LocalTransport::new(dispatcher());
        let err = transport
            .call(
                "svc",
                "slow",
                Bytes::from_static(b"x"),
                "text/plain",
                Some(Duration::from_secs(1)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ChunkwireError::Timeout));
    }

    #[tokio::test]
    async fn test_through_arc() {
        let transport: Arc<LocalTransport> = Arc::new(LocalTransport::new(dispatcher()));
        assert_eq!(CallPrimitive::max_payload_size(&transport), DEFAULT_MAX_PAYLOAD_SIZE);
        let out = CallPrimitive::call(
            &transport,
            "svc",
            "echo",
            Bytes::from_static(b"a"),
            "t",
            None,
        )
        .await
        .unwrap();
        assert_eq!(out, "a");
    }
}
