//! Length-prefixed tunnel framing.
//!
//! Packs a header and a payload into buffers no larger than a maximum size:
//!
//! ```text
//! buffer 0:  [i32 headerLen][gzip(header)][i32 firstLen][first slice][i32 chunkCount]
//! buffer 1..=chunkCount: raw payload chunks, each ≤ max_buffer_size
//! ```
//!
//! All integers are little-endian signed 32-bit. The first slice fills the
//! room left in buffer 0; the first slice followed by the trailing chunks, in
//! order, is the original payload.

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::assembler::{FrameAssembler, LEN_FIELD_SIZE};
use super::compress::compress;
use super::wire_format::MAX_CHUNK_COUNT;
use crate::codec::Codec;
use crate::error::{ChunkwireError, Result};

/// Header of a full-message tunnel frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelHeader {
    /// Method being called.
    pub method_name: String,
    /// Content type of the payload.
    pub content_type: String,
    /// Status of a response (absent on requests and successful responses).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<i32>,
}

impl TunnelHeader {
    /// Header for a request.
    pub fn request(method_name: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            method_name: method_name.into(),
            content_type: content_type.into(),
            status: None,
        }
    }
}

/// Frame a header and payload into buffers of at most `max_buffer_size` bytes.
///
/// # Errors
///
/// Fails if the compressed header does not fit in one buffer, or if the
/// payload would need more than [`MAX_CHUNK_COUNT`] trailing chunks.
pub fn frame<C: Codec, H: Serialize>(
    header: &H,
    payload: Bytes,
    max_buffer_size: usize,
) -> Result<Vec<Bytes>> {
    let header = compress(&C::encode(header)?)?;
    let overhead = 3 * LEN_FIELD_SIZE + header.len();
    if overhead > max_buffer_size {
        return Err(ChunkwireError::protocol(format!(
            "Frame head needs {} bytes but buffer size is {}",
            overhead, max_buffer_size
        )));
    }

    let first_len = payload.len().min(max_buffer_size - overhead);
    let first = payload.slice(..first_len);
    let rest = payload.slice(first_len..);

    let chunk_count = rest.len().div_ceil(max_buffer_size);
    if chunk_count > MAX_CHUNK_COUNT {
        return Err(ChunkwireError::protocol(format!(
            "Payload of {} bytes needs {} chunks, maximum is {}",
            payload.len(),
            chunk_count,
            MAX_CHUNK_COUNT
        )));
    }

    let mut head = BytesMut::with_capacity(overhead + first_len);
    head.put_i32_le(to_i32(header.len())?);
    head.put_slice(&header);
    head.put_i32_le(to_i32(first_len)?);
    head.put_slice(&first);
    head.put_i32_le(to_i32(chunk_count)?);

    let mut buffers = Vec::with_capacity(1 + chunk_count);
    buffers.push(head.freeze());
    let mut offset = 0;
    while offset < rest.len() {
        let end = (offset + max_buffer_size).min(rest.len());
        buffers.push(rest.slice(offset..end));
        offset = end;
    }
    Ok(buffers)
}

/// Reassemble a framed message from all of its buffers.
///
/// # Errors
///
/// Rejects malformed heads (see [`FrameAssembler::push`]) and a buffer list
/// whose length does not match the declared chunk count.
pub fn unframe<C: Codec, H: DeserializeOwned>(buffers: &[Bytes]) -> Result<(H, Bytes)> {
    let mut assembler = FrameAssembler::<H, C>::new();
    for (i, buffer) in buffers.iter().enumerate() {
        if let Some(message) = assembler.push(buffer.clone())? {
            if i + 1 != buffers.len() {
                return Err(ChunkwireError::protocol(format!(
                    "Frame complete after {} buffers but {} were supplied",
                    i + 1,
                    buffers.len()
                )));
            }
            return Ok(message);
        }
    }
    Err(ChunkwireError::protocol(format!(
        "Frame incomplete: {} chunks missing",
        assembler.pending_chunks().max(1)
    )))
}

fn to_i32(value: usize) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| ChunkwireError::protocol(format!("Frame field {value} exceeds i32 range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{JsonCodec, MsgPackCodec};
    use bytes::Buf;

    fn header() -> TunnelHeader {
        TunnelHeader::request("uploadNodeSet", "application/json")
    }

    #[test]
    fn test_empty_body_single_buffer() {
        let buffers = frame::<JsonCodec, _>(&header(), Bytes::new(), 4096).unwrap();
        assert_eq!(buffers.len(), 1);

        // chunk count is the last field of the head buffer
        let mut tail = buffers[0].slice(buffers[0].len() - 4..);
        assert_eq!(tail.get_i32_le(), 0);

        let (h, p): (TunnelHeader, Bytes) = unframe::<JsonCodec, _>(&buffers).unwrap();
        assert_eq!(h, header());
        assert!(p.is_empty());
    }

    #[test]
    fn test_small_body_fits_in_head() {
        let body = Bytes::from_static(b"{\"nodes\":[1,2,3]}");
        let buffers = frame::<JsonCodec, _>(&header(), body.clone(), 4096).unwrap();
        assert_eq!(buffers.len(), 1);

        let (_, p): (TunnelHeader, Bytes) = unframe::<JsonCodec, _>(&buffers).unwrap();
        assert_eq!(p, body);
    }

    #[test]
    fn test_large_body_split_across_buffers() {
        let body = Bytes::from((0..20_000u32).map(|i| (i * 7 % 256) as u8).collect::<Vec<_>>());
        let buffers = frame::<MsgPackCodec, _>(&header(), body.clone(), 1000).unwrap();

        assert!(buffers.len() > 1);
        assert!(buffers.iter().all(|b| b.len() <= 1000));
        assert_eq!(buffers[0].len(), 1000, "head buffer is filled up");

        let (h, p): (TunnelHeader, Bytes) = unframe::<MsgPackCodec, _>(&buffers).unwrap();
        assert_eq!(h, header());
        assert_eq!(p, body);
    }

    #[test]
    fn test_header_too_large_for_buffer() {
        let err = frame::<JsonCodec, _>(&header(), Bytes::new(), 16).unwrap_err();
        assert!(matches!(err, ChunkwireError::Protocol(_)));
    }

    #[test]
    fn test_too_many_chunks() {
        let body = Bytes::from(vec![0u8; 200 * (MAX_CHUNK_COUNT + 2)]);
        assert!(frame::<JsonCodec, _>(&header(), body, 200).is_err());
    }

    #[test]
    fn test_missing_chunk_rejected() {
        let body = Bytes::from(vec![3u8; 5000]);
        let mut buffers = frame::<JsonCodec, _>(&header(), body, 1000).unwrap();
        buffers.pop();
        let result: Result<(TunnelHeader, Bytes)> = unframe::<JsonCodec, _>(&buffers);
        assert!(result.is_err());
    }

    #[test]
    fn test_extra_buffer_rejected() {
        let mut buffers = frame::<JsonCodec, _>(&header(), Bytes::from_static(b"x"), 1000).unwrap();
        buffers.push(Bytes::from_static(b"surplus"));
        let result: Result<(TunnelHeader, Bytes)> = unframe::<JsonCodec, _>(&buffers);
        assert!(result.is_err());
    }

    #[test]
    fn test_no_buffers_rejected() {
        let result: Result<(TunnelHeader, Bytes)> = unframe::<JsonCodec, _>(&[]);
        assert!(result.is_err());
    }
}
