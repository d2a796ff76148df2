//! # chunkwire
//!
//! Transparent chunking for request/response calls over transports with a
//! hard per-message size limit.
//!
//! A logical call of any size is compressed, split into envelopes that fit
//! under the transport's packet limit and sent on the reserved `$call`
//! method. The server reassembles the request in a session, invokes the real
//! handler and streams the response back the same way.
//!
//! ## Architecture
//!
//! - **Client** ([`ChunkedClient`]): drives one logical call over a
//!   [`CallPrimitive`]
//! - **Dispatch** ([`Dispatcher`]): case-insensitive name → invoker table,
//!   owning the `$call` entry
//! - **Sessions** ([`ChunkSessionEngine`]): per-call state machines in a
//!   sharded table, with periodic idle eviction
//! - **Protocol**: envelopes, gzip and length-prefixed tunnel framing
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use chunkwire::{CallOptions, ChunkSessionEngine, ChunkedClient, ClientConfig, Dispatcher,
//!     EngineConfig, LocalTransport};
//!
//! #[tokio::main]
//! async fn main() -> chunkwire::Result<()> {
//!     let engine = ChunkSessionEngine::new(EngineConfig::default());
//!     let dispatcher = Dispatcher::new(engine.clone());
//!     dispatcher.register_fn("echo", |payload, _content_type, _ctx| async move { Ok(payload) })?;
//!
//!     let client = ChunkedClient::new(LocalTransport::new(dispatcher), ClientConfig::default());
//!     let big = vec![7u8; 1 << 20];
//!     let out = client
//!         .call_method("local", "echo", &big, "application/octet-stream", &CallOptions::new())
//!         .await?;
//!     assert_eq!(out.len(), big.len());
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod session;
pub mod trace;
pub mod transport;

pub use client::{CallOptions, ChunkedClient, ClientConfig};
pub use error::{ChunkwireError, Result, StatusError};
pub use handler::{Dispatch, Dispatcher, InvokeContext, Invoker};
pub use protocol::{Envelope, ErrorBody, CHUNK_METHOD_NAME};
pub use session::{ChunkSessionEngine, EngineConfig};
pub use trace::TraceContext;
pub use transport::{CallPrimitive, LocalTransport};
