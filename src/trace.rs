//! W3C trace-context propagation.
//!
//! A [`TraceContext`] is an explicit value: the client creates one per
//! logical call and injects it into the first chunk's `properties`; the
//! session engine extracts it once the request is reassembled and hands a
//! child context to the real handler through its
//! [`InvokeContext`](crate::handler::InvokeContext). There is no global
//! propagator.

use std::collections::HashMap;

/// Properties key carrying the `traceparent` value.
pub const TRACEPARENT_KEY: &str = "traceparent";

/// Sampled flag in the trace flags byte.
const FLAG_SAMPLED: u8 = 0x01;

/// Identity of one span within a trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    /// 16-byte trace ID as 32 lowercase hex chars.
    pub trace_id: String,
    /// 8-byte span ID as 16 lowercase hex chars.
    pub span_id: String,
    /// Trace flags (01 = sampled).
    pub flags: u8,
}

impl TraceContext {
    /// Start a new trace.
    pub fn new_root() -> Self {
        Self {
            trace_id: generate_trace_id(),
            span_id: generate_span_id(),
            flags: FLAG_SAMPLED,
        }
    }

    /// A new span in the same trace, parented on this one.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: generate_span_id(),
            flags: self.flags,
        }
    }

    /// Parse a `traceparent` value: `00-{trace_id}-{span_id}-{flags}`.
    pub fn parse(traceparent: &str) -> Option<Self> {
        let mut parts = traceparent.split('-');
        let (version, trace_id, span_id, flags) =
            (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() || version != "00" {
            return None;
        }

        if trace_id.len() != 32 || span_id.len() != 16 || flags.len() != 2 {
            return None;
        }
        if !is_hex(trace_id) || !is_hex(span_id) {
            return None;
        }
        // all-zero ids are invalid per W3C
        if trace_id.bytes().all(|b| b == b'0') || span_id.bytes().all(|b| b == b'0') {
            return None;
        }

        let flags = u8::from_str_radix(flags, 16).ok()?;
        Some(Self {
            trace_id: trace_id.to_ascii_lowercase(),
            span_id: span_id.to_ascii_lowercase(),
            flags,
        })
    }

    /// Format as a `traceparent` value.
    pub fn to_traceparent(&self) -> String {
        format!("00-{}-{}-{:02x}", self.trace_id, self.span_id, self.flags)
    }

    /// Whether the sampled flag is set.
    pub fn is_sampled(&self) -> bool {
        self.flags & FLAG_SAMPLED != 0
    }

    /// Write this context into a properties map.
    pub fn inject(&self, properties: &mut HashMap<String, String>) {
        properties.insert(TRACEPARENT_KEY.to_string(), self.to_traceparent());
    }

    /// Read a context from a properties map, if a valid one is present.
    pub fn extract(properties: &HashMap<String, String>) -> Option<Self> {
        properties
            .get(TRACEPARENT_KEY)
            .and_then(|value| Self::parse(value))
    }
}

fn is_hex(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Generate a random 16-byte trace ID as 32 hex chars.
fn generate_trace_id() -> String {
    let bytes: [u8; 16] = rand::random();
    hex_encode(&bytes)
}

/// Generate a random 8-byte span ID as 16 hex chars.
fn generate_span_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex_encode(&bytes)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
