//! Wire-level constants and sizing rules for the chunk protocol.
//!
//! ```text
//! client                                   server ($call)
//!   │ {methodName, contentType, contentLength,   │
//!   │  maxChunkLength, timeout, properties,      │
//!   │  payload[0]}                               │
//!   │ ─────────────────────────────────────────► │  Receiving
//!   │ ◄───────────────────────────────── {handle}│
//!   │ {handle, payload[1..]}                     │
//!   │ ─────────────────────────────────────────► │  Receiving → Invoking → Sending
//!   │ ◄──── {handle, contentLength, status?, payload}
//!   │ {handle}                                   │
//!   │ ─────────────────────────────────────────► │  Sending
//!   │ ◄─────────────────────── {status?, payload}│  Done (no handle)
//! ```

/// Method name reserved for chunk-protocol envelopes on the dispatch surface.
pub const CHUNK_METHOD_NAME: &str = "$call";

/// Hard cap on trailing chunks in a tunnel frame.
pub const MAX_CHUNK_COUNT: usize = 1024;

/// Fraction of the transport packet limit used for chunk payload bytes.
///
/// The remainder is headroom for envelope fields and base64 expansion.
pub const CHUNK_RATIO: f64 = 0.66;

/// Default transport packet limit (128 KiB, a common broker limit).
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 128 * 1024;

/// Content type used when a first chunk does not announce one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Status codes used on the wire.
pub mod status {
    /// Success; never written to the wire (absence means success).
    pub const OK: i32 = 200;
    /// Malformed request or protocol violation.
    pub const BAD_REQUEST: i32 = 400;
    /// No invoker for the requested method.
    pub const NOT_FOUND: i32 = 404;
    /// Unknown/evicted handle or timed-out call.
    pub const REQUEST_TIMEOUT: i32 = 408;
    /// Handler failed with an unrecognized error.
    pub const INTERNAL_SERVER_ERROR: i32 = 500;

    /// Check whether a status code denotes success.
    #[inline]
    pub fn is_success(code: i32) -> bool {
        code == OK
    }
}

/// Compute the chunk length for a transport packet limit.
///
/// `floor(ratio × max_payload_size)`, never below 1.
pub fn max_chunk_length(max_payload_size: usize, ratio: f64) -> usize {
    ((max_payload_size as f64 * ratio).floor() as usize).max(1)
}

/// Number of chunks needed to carry `len` bytes (at least one).
pub fn chunk_count(len: usize, max_chunk_length: usize) -> usize {
    len.div_ceil(max_chunk_length.max(1)).max(1)
}
