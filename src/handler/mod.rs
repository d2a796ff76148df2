//! Handler module - invokers and name-based dispatch.
//!
//! Provides:
//! - [`Invoker`] - a dispatchable unit (raw payload in, raw payload out)
//! - [`Dispatcher`] - case-insensitive name→invoker table owning the
//!   reserved `$call` entry
//! - [`InvokeContext`] - lets invokers dispatch further calls and carries
//!   the trace context
//!
//! # Example
//!
//! ```ignore
//! use chunkwire::codec::JsonCodec;
//! use chunkwire::handler::Dispatcher;
//! use chunkwire::session::ChunkSessionEngine;
//!
//! let dispatcher = Dispatcher::new(ChunkSessionEngine::new(Default::default()));
//!
//! // Raw bytes in, raw bytes out
//! dispatcher.register_fn("echo", |payload, _content_type, _ctx| async move { Ok(payload) })?;
//!
//! // Typed request/response
//! dispatcher.register_typed::<JsonCodec, _, _, _, _>(
//!     "len",
//!     |items: Vec<String>, _ctx| async move { Ok(items.len()) },
//! )?;
//! ```

mod context;
mod registry;

pub use context::InvokeContext;
pub use registry::{BoxFuture, Dispatch, Dispatcher, FnInvoker, Invoker, TypedInvoker};
