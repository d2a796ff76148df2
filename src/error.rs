//! Error types for chunkwire.

use bytes::Bytes;
use thiserror::Error;

use crate::protocol::{status, ErrorBody};

/// Main error type for all chunkwire operations.
#[derive(Debug, Error)]
pub enum ChunkwireError {
    /// I/O error (compression streams).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (malformed envelope or frame, bounds violation, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Continuation referenced a handle the server does not know (completed or evicted).
    #[error("Unknown handle: {0}")]
    UnknownHandle(String),

    /// No invoker registered under the requested method name.
    #[error("Invoker not registered: {0}")]
    InvokerNotRegistered(String),

    /// Remote handler failed with a status code.
    #[error(transparent)]
    Status(#[from] StatusError),

    /// Call was cancelled through its cancellation token.
    #[error("Call cancelled")]
    Cancelled,

    /// Call timed out.
    #[error("Call timed out")]
    Timeout,

    /// Failure reported by the underlying call primitive.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl ChunkwireError {
    /// Status code class this error maps to on the wire.
    pub fn status_code(&self) -> i32 {
        match self {
            ChunkwireError::Protocol(_) => status::BAD_REQUEST,
            ChunkwireError::UnknownHandle(_) | ChunkwireError::Timeout => status::REQUEST_TIMEOUT,
            ChunkwireError::InvokerNotRegistered(_) => status::NOT_FOUND,
            ChunkwireError::Status(e) => e.status,
            _ => status::INTERNAL_SERVER_ERROR,
        }
    }

    /// Shorthand for a protocol error.
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        ChunkwireError::Protocol(msg.into())
    }
}

/// A status-carrying application error.
///
/// Handlers return this (wrapped in [`ChunkwireError::Status`]) to deliver
/// a structured error to the caller. On the client side `payload` holds the
/// raw decompressed error payload as received.
#[derive(Debug, Clone, Error)]
#[error("Remote call failed with status {status}: {}", body.message)]
pub struct StatusError {
    /// Status code (never [`status::OK`]).
    pub status: i32,
    /// Structured error body.
    pub body: ErrorBody,
    /// Raw encoded body (empty when created by a handler).
    pub payload: Bytes,
}

impl StatusError {
    /// Create a new status error with a message.
    pub fn new(status: i32, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody::new(message),
            payload: Bytes::new(),
        }
    }

    /// Create a status error from a full error body.
    pub fn with_body(status: i32, body: ErrorBody) -> Self {
        Self {
            status,
            body,
            payload: Bytes::new(),
        }
    }
}

/// Result type alias using ChunkwireError.
pub type Result<T> = std::result::Result<T, ChunkwireError>;
