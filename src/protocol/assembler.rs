//! Streaming reassembly of tunnel frames.
//!
//! Buffers of a framed message arrive one at a time (e.g. as separate broker
//! messages). The assembler is a small state machine:
//! - `WaitingForHead`: the next buffer must be the head buffer
//! - `WaitingForChunks`: head parsed, N trailing raw chunks still expected
//!
//! All declared lengths in the head are validated against the buffer before
//! anything is sliced, and the trailing chunk count is capped at
//! [`MAX_CHUNK_COUNT`] before any memory is reserved for it.

use std::marker::PhantomData;

use bytes::{Buf, Bytes, BytesMut};
use serde::de::DeserializeOwned;

use super::compress::decompress;
use super::wire_format::MAX_CHUNK_COUNT;
use crate::codec::{Codec, JsonCodec};
use crate::error::{ChunkwireError, Result};

/// Size of one length/count field in the head buffer.
pub(crate) const LEN_FIELD_SIZE: usize = 4;

/// Parsing state.
#[derive(Debug)]
enum State {
    /// Next buffer is a head buffer.
    WaitingForHead,
    /// Head parsed, collecting trailing chunks.
    WaitingForChunks {
        header: Bytes,
        body: BytesMut,
        remaining: usize,
    },
}

/// Parsed head buffer.
struct Head {
    header: Bytes,
    first: Bytes,
    chunk_count: usize,
}

/// Reassembles a framed message from its buffers.
///
/// `H` is the header type, decoded with codec `C` after gzip decompression.
pub struct FrameAssembler<H, C = JsonCodec> {
    state: State,
    max_buffer_size: Option<usize>,
    _marker: PhantomData<fn() -> (H, C)>,
}

impl<H: DeserializeOwned, C: Codec> FrameAssembler<H, C> {
    /// Create an assembler that accepts trailing chunks of any size.
    pub fn new() -> Self {
        Self {
            state: State::WaitingForHead,
            max_buffer_size: None,
            _marker: PhantomData,
        }
    }

    /// Create an assembler that rejects buffers larger than `max_buffer_size`.
    pub fn with_max_buffer_size(max_buffer_size: usize) -> Self {
        Self {
            state: State::WaitingForHead,
            max_buffer_size: Some(max_buffer_size),
            _marker: PhantomData,
        }
    }

    /// Push the next buffer.
    ///
    /// Returns `Ok(Some((header, payload)))` once the message is complete,
    /// `Ok(None)` while trailing chunks are still expected.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the head is malformed, a declared length
    /// runs past the buffer, the chunk count exceeds the cap, or a buffer is
    /// larger than the configured maximum. The assembler resets on error.
    pub fn push(&mut self, buffer: Bytes) -> Result<Option<(H, Bytes)>> {
        if let Some(max) = self.max_buffer_size {
            if buffer.len() > max {
                self.reset();
                return Err(ChunkwireError::protocol(format!(
                    "Frame buffer of {} bytes exceeds maximum {}",
                    buffer.len(),
                    max
                )));
            }
        }

        match std::mem::replace(&mut self.state, State::WaitingForHead) {
            State::WaitingForHead => {
                let head = parse_head(buffer)?;
                if head.chunk_count == 0 {
                    return Ok(Some((decode_header::<H, C>(&head.header)?, head.first)));
                }

                let mut body = BytesMut::with_capacity(head.first.len());
                body.extend_from_slice(&head.first);
                self.state = State::WaitingForChunks {
                    header: head.header,
                    body,
                    remaining: head.chunk_count,
                };
                Ok(None)
            }

            State::WaitingForChunks {
                header,
                mut body,
                remaining,
            } => {
                body.extend_from_slice(&buffer);
                if remaining > 1 {
                    self.state = State::WaitingForChunks {
                        header,
                        body,
                        remaining: remaining - 1,
                    };
                    return Ok(None);
                }
                Ok(Some((decode_header::<H, C>(&header)?, body.freeze())))
            }
        }
    }

    /// Number of trailing chunks still expected (0 when idle).
    pub fn pending_chunks(&self) -> usize {
        match &self.state {
            State::WaitingForHead => 0,
            State::WaitingForChunks { remaining, .. } => *remaining,
        }
    }

    /// Whether a message is partially assembled.
    pub fn is_active(&self) -> bool {
        matches!(self.state, State::WaitingForChunks { .. })
    }

    /// Discard any partially assembled message.
    pub fn reset(&mut self) {
        self.state = State::WaitingForHead;
    }
}

impl<H: DeserializeOwned, C: Codec> Default for FrameAssembler<H, C> {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_head(mut cursor: Bytes) -> Result<Head> {
    let header_len = read_length(&mut cursor, "header")?;
    let header = cursor.split_to(header_len);

    let first_len = read_length(&mut cursor, "first slice")?;
    let first = cursor.split_to(first_len);

    let chunk_count = read_field(&mut cursor, "chunk count")?;
    if chunk_count > MAX_CHUNK_COUNT {
        return Err(ChunkwireError::protocol(format!(
            "Frame chunk count {} exceeds maximum {}",
            chunk_count, MAX_CHUNK_COUNT
        )));
    }

    if cursor.has_remaining() {
        return Err(ChunkwireError::protocol(format!(
            "{} unexpected bytes after frame head",
            cursor.remaining()
        )));
    }

    Ok(Head {
        header,
        first,
        chunk_count,
    })
}

/// Read a non-negative i32 field.
fn read_field(cursor: &mut Bytes, what: &str) -> Result<usize> {
    if cursor.remaining() < LEN_FIELD_SIZE {
        return Err(ChunkwireError::protocol(format!(
            "Frame truncated before {what} field"
        )));
    }
    let value = cursor.get_i32_le();
    usize::try_from(value)
        .map_err(|_| ChunkwireError::protocol(format!("Negative {what} field: {value}")))
}

/// Read a length field and check it against the bytes left in the buffer.
fn read_length(cursor: &mut Bytes, what: &str) -> Result<usize> {
    let len = read_field(cursor, what)?;
    if len > cursor.remaining() {
        return Err(ChunkwireError::protocol(format!(
            "Declared {what} length {len} exceeds remaining {} bytes",
            cursor.remaining()
        )));
    }
    Ok(len)
}

fn decode_header<H: DeserializeOwned, C: Codec>(header: &[u8]) -> Result<H> {
    C::decode(&decompress(header)?)
}
