//! MsgPack codec using `rmp-serde`.
//!
//! Always uses `to_vec_named`: structs are written as maps keyed by field
//! name, so optional envelope fields can be omitted and peers written in
//! other languages decode them by name.

use super::Codec;
use crate::error::Result;

/// MessagePack codec for structured data.
pub struct MsgPackCodec;

impl Codec for MsgPackCodec {
    const CONTENT_TYPE: &'static str = "application/x-msgpack";

    #[inline]
    fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        // to_vec_named, NOT to_vec: skipped Option fields break positional arrays
        Ok(rmp_serde::to_vec_named(value)?)
    }

    #[inline]
    fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
