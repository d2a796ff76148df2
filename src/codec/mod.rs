//! Codec module - structured serialization for envelopes and typed payloads.
//!
//! This module provides codecs for encoding/decoding structured values:
//!
//! - [`JsonCodec`] - JSON using `serde_json` (default envelope codec)
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (`to_vec_named`)
//!
//! # Design
//!
//! Codecs are marker structs implementing [`Codec`] with associated functions
//! rather than trait objects. Engine and client are generic over the codec, so
//! the choice is made at compile time.
//!
//! # Example
//!
//! ```
//! use chunkwire::codec::{Codec, JsonCodec, MsgPackCodec};
//!
//! let encoded = JsonCodec::encode(&"hello").unwrap();
//! let decoded: String = JsonCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//!
//! let encoded = MsgPackCodec::encode(&42u32).unwrap();
//! let decoded: u32 = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, 42);
//! ```

mod json;
mod msgpack;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// A structured serialization format.
pub trait Codec: Send + Sync + 'static {
    /// MIME content type produced by this codec.
    const CONTENT_TYPE: &'static str;

    /// Encode a value to bytes.
    fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>>;

    /// Decode bytes to a value.
    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T>;
}
