//! Per-call session state.
//!
//! A session moves strictly forward through
//! `Receiving → Invoking → Sending → Done`. Each phase carries its own
//! data, so a receive buffer only exists while receiving and a send buffer
//! only while sending.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;

use crate::error::{ChunkwireError, Result};

/// Phase of a chunked call on the server.
#[derive(Debug)]
pub enum Phase {
    /// Reassembling the request. `buffer` has the announced length and is
    /// never resized.
    Receiving { buffer: Vec<u8>, received: usize },
    /// Real handler is running.
    Invoking,
    /// Streaming the response back.
    Sending {
        buffer: Bytes,
        sent: usize,
        status: i32,
    },
    /// Response fully sent; the session leaves the table in the same step.
    Done,
}

impl Phase {
    /// Short name for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Receiving { .. } => "receiving",
            Phase::Invoking => "invoking",
            Phase::Sending { .. } => "sending",
            Phase::Done => "done",
        }
    }
}

/// Request metadata captured from the first chunk.
#[derive(Debug, Clone)]
pub struct CallInfo {
    /// Target method of the logical call.
    pub method: String,
    /// Content type of the request body.
    pub content_type: String,
    /// Propagation properties from the first chunk.
    pub properties: HashMap<String, String>,
}

/// One response slice produced by [`Session::next_slice`].
#[derive(Debug)]
pub struct Slice {
    /// Payload bytes of this slice.
    pub payload: Bytes,
    /// Total response length, set on the first slice only.
    pub content_length: Option<u64>,
    /// Response status.
    pub status: i32,
    /// Whether this is the first slice.
    pub first: bool,
    /// Whether this slice completes the response.
    pub last: bool,
}

/// Server-side state of one in-flight chunked call.
#[derive(Debug)]
pub struct Session {
    handle: String,
    info: CallInfo,
    timeout: Duration,
    max_chunk_length: usize,
    phase: Phase,
}

impl Session {
    /// Create a session in the receiving phase.
    pub fn new(
        handle: String,
        info: CallInfo,
        content_length: usize,
        max_chunk_length: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            handle,
            info,
            timeout,
            max_chunk_length: max_chunk_length.max(1),
            phase: Phase::Receiving {
                buffer: vec![0u8; content_length],
                received: 0,
            },
        }
    }

    /// Session handle.
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Call metadata.
    pub fn info(&self) -> &CallInfo {
        &self.info
    }

    /// Inactivity timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Current phase.
    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    /// Whether the session is still reassembling its request.
    pub fn is_receiving(&self) -> bool {
        matches!(self.phase, Phase::Receiving { .. })
    }

    /// Copy an inbound slice into the receive buffer.
    ///
    /// Returns `true` once the buffer is full.
    ///
    /// # Errors
    ///
    /// Protocol error if not receiving or if the slice overflows the
    /// announced content length; the buffer is left untouched.
    pub fn receive(&mut self, payload: &[u8]) -> Result<bool> {
        let Phase::Receiving { buffer, received } = &mut self.phase else {
            return Err(self.wrong_phase("receive"));
        };

        let end = *received + payload.len();
        if end > buffer.len() {
            return Err(ChunkwireError::protocol(format!(
                "Chunk of {} bytes at offset {} overflows announced length {}",
                payload.len(),
                received,
                buffer.len()
            )));
        }

        buffer[*received..end].copy_from_slice(payload);
        *received = end;
        Ok(end == buffer.len())
    }

    /// Move a fully received session to `Invoking`, handing out the request body.
    pub fn begin_invoke(&mut self) -> Result<Vec<u8>> {
        match std::mem::replace(&mut self.phase, Phase::Invoking) {
            Phase::Receiving { buffer, received } if received == buffer.len() => Ok(buffer),
            previous => {
                self.phase = previous;
                if self.is_receiving() {
                    return Err(ChunkwireError::protocol(format!(
                        "Session {} invoked before request was complete",
                        self.handle
                    )));
                }
                Err(self.wrong_phase("invoke"))
            }
        }
    }

    /// Move an invoking session to `Sending`.
    pub fn begin_sending(&mut self, buffer: Bytes, status: i32) -> Result<()> {
        if !matches!(self.phase, Phase::Invoking) {
            return Err(self.wrong_phase("send"));
        }
        self.phase = Phase::Sending {
            buffer,
            sent: 0,
            status,
        };
        Ok(())
    }

    /// Cut the next response slice of at most `max_chunk_length` bytes.
    ///
    /// Moves the session to `Done` when the slice completes the response.
    pub fn next_slice(&mut self) -> Result<Slice> {
        let max_chunk_length = self.max_chunk_length;
        let Phase::Sending {
            buffer,
            sent,
            status,
        } = &mut self.phase
        else {
            return Err(self.wrong_phase("send"));
        };

        let first = *sent == 0;
        let end = (*sent + max_chunk_length).min(buffer.len());
        let payload = buffer.slice(*sent..end);
        *sent = end;

        let slice = Slice {
            payload,
            content_length: first.then_some(buffer.len() as u64),
            status: *status,
            first,
            last: end == buffer.len(),
        };
        if slice.last {
            self.phase = Phase::Done;
        }
        Ok(slice)
    }

    fn wrong_phase(&self, action: &str) -> ChunkwireError {
        ChunkwireError::protocol(format!(
            "Session {} cannot {} while {}",
            self.handle,
            action,
            self.phase.name()
        ))
    }
}
