//! Server-side chunk sessions.
//!
//! - [`ChunkSessionEngine`] - the `$call` invoker driving sessions
//! - [`SessionTable`] - sharded handle → session table with busy leases
//! - [`Session`] / [`Phase`] - per-call state machine

mod engine;
mod state;
mod table;

pub use engine::{
    ChunkSessionEngine, EngineConfig, DEFAULT_MAX_CHUNK_LENGTH, DEFAULT_MAX_CONTENT_LENGTH,
    DEFAULT_SESSION_TIMEOUT, DEFAULT_SHARD_COUNT, DEFAULT_SWEEP_INTERVAL,
};
pub use state::{CallInfo, Phase, Session, Slice};
pub use table::{SessionEntry, SessionLease, SessionTable};
