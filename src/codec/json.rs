//! JSON codec using `serde_json`.
//!
//! Byte payloads inside envelopes are carried as base64 strings in this
//! format (see `protocol::envelope`).

use super::Codec;
use crate::error::Result;

/// JSON codec for structured data.
pub struct JsonCodec;

impl Codec for JsonCodec {
    const CONTENT_TYPE: &'static str = "application/json";

    #[inline]
    fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    #[inline]
    fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
