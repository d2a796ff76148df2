//! Sharded handle → session table.
//!
//! Each shard is an independently locked map. A request takes a
//! [`SessionLease`] through [`SessionTable::checkout`], which marks the
//! entry busy under its shard lock. [`SessionTable::sweep`] skips busy
//! entries under the same lock, so a session is never evicted while a
//! request is processing it. Dropping the lease stamps `last_activity` and
//! clears the busy flag.

use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tokio::time::Instant;

use super::state::Session;
use crate::error::{ChunkwireError, Result};

type Shard = Mutex<HashMap<String, Arc<SessionEntry>>>;

/// One slot in the table.
#[derive(Debug)]
pub struct SessionEntry {
    busy: AtomicBool,
    last_activity: Mutex<Instant>,
    timeout: Duration,
    session: Mutex<Session>,
}

impl SessionEntry {
    fn new(session: Session) -> Self {
        Self {
            busy: AtomicBool::new(true),
            last_activity: Mutex::new(Instant::now()),
            timeout: session.timeout(),
            session: Mutex::new(session),
        }
    }

    fn is_idle(&self, now: Instant) -> bool {
        now.saturating_duration_since(*self.last_activity.lock()) > self.timeout
    }
}

/// Concurrent session table with server-allocated handles.
#[derive(Debug)]
pub struct SessionTable {
    shards: Box<[Shard]>,
    hasher: RandomState,
    next_handle: AtomicU64,
}

impl SessionTable {
    /// Create a table with `shard_count` shards (at least one).
    pub fn new(shard_count: usize) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Self {
            shards,
            hasher: RandomState::new(),
            next_handle: AtomicU64::new(0),
        }
    }

    /// Allocate the next handle. Handles are never reused.
    pub fn allocate_handle(&self) -> String {
        (self.next_handle.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }

    /// Insert a new session, returning a lease that already holds it busy.
    pub fn insert(&self, session: Session) -> SessionLease<'_> {
        let handle = session.handle().to_string();
        let entry = Arc::new(SessionEntry::new(session));
        self.shard(&handle).lock().insert(handle.clone(), entry.clone());
        SessionLease {
            table: self,
            handle,
            entry,
        }
    }

    /// Check out the session for `handle` for exclusive processing.
    ///
    /// # Errors
    ///
    /// `UnknownHandle` if no such session exists (never created, completed
    /// or evicted); a protocol error if another request holds it.
    pub fn checkout(&self, handle: &str) -> Result<SessionLease<'_>> {
        let shard = self.shard(handle).lock();
        let entry = shard
            .get(handle)
            .ok_or_else(|| ChunkwireError::UnknownHandle(handle.to_string()))?;

        if entry.busy.swap(true, Ordering::AcqRel) {
            return Err(ChunkwireError::protocol(format!(
                "Session {handle} is busy with another request"
            )));
        }

        Ok(SessionLease {
            table: self,
            handle: handle.to_string(),
            entry: entry.clone(),
        })
    }

    /// Remove every idle, non-busy session. Returns the removed handles.
    pub fn sweep(&self, now: Instant) -> Vec<String> {
        let mut removed = Vec::new();
        for shard in self.shards.iter() {
            shard.lock().retain(|handle, entry| {
                if entry.busy.load(Ordering::Acquire) || !entry.is_idle(now) {
                    return true;
                }
                removed.push(handle.clone());
                false
            });
        }
        removed
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    /// Whether the table holds no sessions.
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.lock().is_empty())
    }

    /// Whether a session exists for `handle`.
    pub fn contains(&self, handle: &str) -> bool {
        self.shard(handle).lock().contains_key(handle)
    }

    fn shard(&self, handle: &str) -> &Shard {
        let index = self.hasher.hash_one(handle) as usize % self.shards.len();
        &self.shards[index]
    }

    /// Remove `handle` only if it still maps to `entry`.
    fn remove_entry(&self, handle: &str, entry: &Arc<SessionEntry>) -> bool {
        let mut shard = self.shard(handle).lock();
        match shard.get(handle) {
            Some(current) if Arc::ptr_eq(current, entry) => {
                shard.remove(handle);
                true
            }
            _ => false,
        }
    }
}

/// Exclusive hold on one session for the duration of a request.
#[derive(Debug)]
pub struct SessionLease<'a> {
    table: &'a SessionTable,
    handle: String,
    entry: Arc<SessionEntry>,
}

impl SessionLease<'_> {
    /// Handle of the leased session.
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Lock the session. Do not hold the guard across an await point.
    pub fn session(&self) -> MutexGuard<'_, Session> {
        self.entry.session.lock()
    }

    /// Remove the finished session from the table.
    ///
    /// Returns `false` if the slot no longer holds this session.
    pub fn complete(self) -> bool {
        self.table.remove_entry(&self.handle, &self.entry)
    }
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        *self.entry.last_activity.lock() = Instant::now();
        self.entry.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::state::CallInfo;

    fn session(table: &SessionTable, timeout: Duration) -> Session {
        Session::new(
            table.allocate_handle(),
            CallInfo {
                method: "echo".to_string(),
                content_type: "application/json".to_string(),
                properties: HashMap::new(),
            },
            4,
            4,
            timeout,
        )
    }

    #[test]
    fn test_handles_are_monotonic() {
        let table = SessionTable::new(4);
        assert_eq!(table.allocate_handle(), "1");
        assert_eq!(table.allocate_handle(), "2");
        assert_eq!(table.allocate_handle(), "3");
    }

    #[test]
    fn test_insert_checkout_complete() {
        let table = SessionTable::new(4);
        let handle = {
            let lease = table.insert(session(&table, Duration::from_secs(30)));
            lease.handle().to_string()
        };
        assert!(table.contains(&handle));
        assert_eq!(table.len(), 1);

        let lease = table.checkout(&handle).unwrap();
        assert!(lease.session().is_receiving());
        assert!(lease.complete());

        assert!(table.is_empty());
        assert!(matches!(
            table.checkout(&handle),
            Err(ChunkwireError::UnknownHandle(_))
        ));
    }

    #[test]
    fn test_busy_session_rejects_second_checkout() {
        let table = SessionTable::new(1);
        let lease = table.insert(session(&table, Duration::from_secs(30)));
        let handle = lease.handle().to_string();

        assert!(matches!(
            table.checkout(&handle),
            Err(ChunkwireError::Protocol(_))
        ));
        drop(lease);
        assert!(table.checkout(&handle).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_idle_sessions() {
        let table = SessionTable::new(4);
        let short = table
            .insert(session(&table, Duration::from_secs(1)))
            .handle()
            .to_string();
        let long = table
            .insert(session(&table, Duration::from_secs(60)))
            .handle()
            .to_string();

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(table.sweep(Instant::now()).is_empty());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(table.sweep(Instant::now()), vec![short.clone()]);
        assert!(!table.contains(&short));
        assert!(table.contains(&long));
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_session_survives_sweep() {
        let table = SessionTable::new(4);
        let handle = table
            .insert(session(&table, Duration::from_secs(1)))
            .handle()
            .to_string();

        tokio::time::advance(Duration::from_secs(5)).await;
        let lease = table.checkout(&handle).unwrap();
        assert!(table.sweep(Instant::now()).is_empty());
        assert!(table.contains(&handle));

        // releasing the lease counts as activity
        drop(lease);
        assert!(table.sweep(Instant::now()).is_empty());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(table.sweep(Instant::now()), vec![handle]);
    }

    #[test]
    fn test_complete_does_not_remove_replacement() {
        let table = SessionTable::new(1);
        let lease = table.insert(session(&table, Duration::from_secs(30)));
        let handle = lease.handle().to_string();

        // evict and put an unrelated entry under the same key
        table.shards[0].lock().remove(&handle);
        let replacement = Session::new(
            handle.clone(),
            CallInfo {
                method: "other".to_string(),
                content_type: "application/json".to_string(),
                properties: HashMap::new(),
            },
            1,
            1,
            Duration::from_secs(30),
        );
        drop(table.insert(replacement));

        assert!(!lease.complete());
        assert!(table.contains(&handle));
    }

    #[test]
    fn test_concurrent_checkouts_single_winner() {
        let table = Arc::new(SessionTable::new(8));
        let handle = table
            .insert(session(&table, Duration::from_secs(30)))
            .handle()
            .to_string();

        let barrier = Arc::new(std::sync::Barrier::new(8));
        let wins = Arc::new(AtomicU64::new(0));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let table = table.clone();
                let handle = handle.clone();
                let barrier = barrier.clone();
                let wins = wins.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    if let Ok(lease) = table.checkout(&handle) {
                        wins.fetch_add(1, Ordering::SeqCst);
                        // hold until every thread has tried
                        barrier.wait();
                        drop(lease);
                    } else {
                        barrier.wait();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(wins.load(Ordering::SeqCst), 1);
    }
}
