//! The chunk-protocol envelope and the structured error body.
//!
//! Every field is optional and omitted from the wire when absent; presence
//! carries meaning (a missing `handle` opens a session, a missing `status`
//! means success).

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One wire unit of a chunked call, in either direction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Session correlation id; absent only on the first request chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,

    /// Target method of the logical call (first request chunk).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_name: Option<String>,

    /// Content type of the logical request body (first request chunk).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Total compressed length of the body sent in this direction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,

    /// Largest payload slice either side may put in one envelope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_chunk_length: Option<u64>,

    /// Session inactivity timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Propagation properties (`traceparent`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<HashMap<String, String>>,

    /// Slice of the compressed body.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "payload_bytes"
    )]
    pub payload: Option<Bytes>,

    /// Non-success status of the logical call (responses only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<i32>,
}

impl Envelope {
    /// Envelope carrying only a handle (server ack, client pull).
    pub fn handle_only(handle: impl Into<String>) -> Self {
        Self {
            handle: Some(handle.into()),
            ..Self::default()
        }
    }

    /// Continuation chunk: handle plus the next payload slice.
    pub fn continuation(handle: impl Into<String>, payload: Bytes) -> Self {
        Self {
            handle: Some(handle.into()),
            payload: Some(payload),
            ..Self::default()
        }
    }

    /// Payload slice, empty if none was carried.
    pub fn payload_slice(&self) -> &[u8] {
        self.payload.as_deref().unwrap_or_default()
    }

    /// Announced timeout as a duration.
    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_millis)
    }
}

/// Structured error delivered as the payload of a non-success response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable message.
    pub message: String,
    /// Optional application-defined details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorBody {
    /// Create an error body with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    /// Attach structured details.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Serde adapter for payload bytes: base64 text in human-readable formats,
/// native binary otherwise. Decoding accepts either representation.
mod payload_bytes {
    use std::fmt;

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::de::{self, SeqAccess, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Bytes>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            None => serializer.serialize_none(),
            Some(bytes) if serializer.is_human_readable() => {
                serializer.serialize_str(&STANDARD.encode(bytes))
            }
            Some(bytes) => serializer.serialize_bytes(bytes),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Bytes>, D::Error> {
        deserializer.deserialize_any(PayloadVisitor)
    }

    struct PayloadVisitor;

    impl<'de> Visitor<'de> for PayloadVisitor {
        type Value = Option<Bytes>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("base64 string, byte buffer, or null")
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(
            self,
            deserializer: D,
        ) -> Result<Self::Value, D::Error> {
            deserializer.deserialize_any(self)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            STANDARD
                .decode(v)
                .map(|b| Some(Bytes::from(b)))
                .map_err(|e| E::custom(format!("invalid base64 payload: {e}")))
        }

        fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
            Ok(Some(Bytes::copy_from_slice(v)))
        }

        fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
            Ok(Some(Bytes::from(v)))
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(b) = seq.next_element::<u8>()? {
                out.push(b);
            }
            Ok(Some(Bytes::from(out)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Codec, JsonCodec, MsgPackCodec};

    #[test]
    fn test_absent_fields_are_omitted() {
        let env = Envelope::handle_only("17");
        let json = String::from_utf8(JsonCodec::encode(&env).unwrap()).unwrap();
        assert_eq!(json, r#"{"handle":"17"}"#);
    }

    #[test]
    fn test_json_field_names_are_camel_case() {
        let env = Envelope {
            method_name: Some("getNodes".to_string()),
            content_type: Some("application/json".to_string()),
            content_length: Some(3),
            max_chunk_length: Some(86_507),
            timeout: Some(30_000),
            payload: Some(Bytes::from_static(b"abc")),
            ..Envelope::default()
        };
        let json: serde_json::Value =
            serde_json::from_slice(&JsonCodec::encode(&env).unwrap()).unwrap();

        assert_eq!(json["methodName"], "getNodes");
        assert_eq!(json["contentType"], "application/json");
        assert_eq!(json["contentLength"], 3);
        assert_eq!(json["maxChunkLength"], 86_507);
        assert_eq!(json["timeout"], 30_000);
        assert_eq!(json["payload"], "YWJj");
        assert!(json.get("status").is_none());
        assert!(json.get("handle").is_none());
    }

    #[test]
    fn test_json_payload_accepts_number_array() {
        let env: Envelope = JsonCodec::decode(br#"{"handle":"1","payload":[1,2,3]}"#).unwrap();
        assert_eq!(env.payload_slice(), &[1, 2, 3]);
    }

    #[test]
    fn test_json_payload_null_is_absent() {
        let env: Envelope = JsonCodec::decode(br#"{"handle":"1","payload":null}"#).unwrap();
        assert!(env.payload.is_none());
    }

    #[test]
    fn test_json_invalid_base64_rejected() {
        let result: crate::error::Result<Envelope> =
            JsonCodec::decode(br#"{"payload":"***"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_msgpack_payload_is_binary() {
        let env = Envelope::continuation("9", Bytes::from_static(&[0xde, 0xad]));
        let encoded = MsgPackCodec::encode(&env).unwrap();
        // fixmap(2), "handle", "9", "payload", bin8(2)
        assert!(encoded.windows(2).any(|w| w == [0xc4, 0x02]));

        let decoded: Envelope = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn test_error_body_with_details() {
        let body = ErrorBody::new("bad node id")
            .with_details(serde_json::json!({"node": "ns=2;i=7"}));
        let encoded = JsonCodec::encode(&body).unwrap();
        let decoded: ErrorBody = JsonCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, body);
    }
}
