//! Payload compression using gzip via `flate2`.
//!
//! Both directions of every chunked call compress the full logical payload
//! first; chunk boundaries are computed over the compressed bytes and the
//! payload is only decompressed after full reassembly.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{ChunkwireError, Result};

/// Default cap on the decompressed size of one logical payload (256 MiB).
pub const DEFAULT_MAX_DECOMPRESSED_LENGTH: usize = 256 * 1024 * 1024;

/// Compress a payload with gzip.
pub fn compress(input: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(
        Vec::with_capacity(input.len() / 2 + 32),
        Compression::default(),
    );
    encoder.write_all(input)?;
    Ok(encoder.finish()?)
}

/// Decompress a gzip payload, capped at [`DEFAULT_MAX_DECOMPRESSED_LENGTH`].
pub fn decompress(input: &[u8]) -> Result<Vec<u8>> {
    decompress_bounded(input, DEFAULT_MAX_DECOMPRESSED_LENGTH)
}

/// Decompress a gzip payload, failing once the output passes `limit` bytes.
///
/// At most `limit + 1` bytes are ever inflated.
pub fn decompress_bounded(input: &[u8], limit: usize) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(input).take((limit as u64).saturating_add(1));
    let mut out = Vec::with_capacity(input.len().saturating_mul(2).min(limit));
    decoder.read_to_end(&mut out)?;
    if out.len() > limit {
        return Err(ChunkwireError::protocol(format!(
            "Decompressed payload exceeds {limit} bytes"
        )));
    }
    Ok(out)
}
