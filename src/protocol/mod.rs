//! Protocol module - envelopes, compression, framing and wire constants.
//!
//! This module implements the wire side of the chunk protocol:
//! - [`Envelope`] - the wire unit exchanged on the reserved `$call` method
//! - gzip compression of whole logical payloads
//! - length-prefixed tunnel framing with a streaming [`FrameAssembler`]

mod assembler;
mod compress;
mod envelope;
mod framing;
mod wire_format;

pub use assembler::FrameAssembler;
pub use compress::{compress, decompress, decompress_bounded, DEFAULT_MAX_DECOMPRESSED_LENGTH};
pub use envelope::{Envelope, ErrorBody};
pub use framing::{frame, unframe, TunnelHeader};
pub use wire_format::{
    chunk_count, max_chunk_length, status, CHUNK_METHOD_NAME, CHUNK_RATIO, DEFAULT_CONTENT_TYPE,
    DEFAULT_MAX_PAYLOAD_SIZE, MAX_CHUNK_COUNT,
};
