//! In-memory [`BattleStore`] fake.
//!
//! Tests seed it with [`SessionRecord`]s and then observe how the session
//! layer uses it: every operation is counted, an artificial latency can be
//! injected to widen race windows, and the next N operations can be made to
//! fail with [`StoreError::Unavailable`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use geobattle_protocol::{PlayerId, SessionId};

use crate::{BattleStore, CombatSnapshot, RosterEntry, SessionMetadata, SessionRecord, StoreError};

/// Number of calls each [`BattleStore`] operation has received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub session_metadata: usize,
    pub list_roster: usize,
    pub latest_snapshots: usize,
}

/// An in-memory [`BattleStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<SessionId, SessionRecord>>,
    latency_ms: AtomicU64,
    failures_pending: AtomicUsize,
    metadata_calls: AtomicUsize,
    roster_calls: AtomicUsize,
    snapshot_calls: AtomicUsize,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a session (builder form).
    pub fn with_session(self, session_id: SessionId, record: SessionRecord) -> Self {
        self.insert_session(session_id, record);
        self
    }

    /// Adds a fixed delay before every operation (builder form).
    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    /// Inserts or replaces a session.
    pub fn insert_session(&self, session_id: SessionId, record: SessionRecord) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id, record);
    }

    /// Removes a session; later loads fail with `SessionNotFound`.
    pub fn remove_session(&self, session_id: &SessionId) -> Option<SessionRecord> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
    }

    /// Sets the delay applied before every operation.
    pub fn set_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(ms, Ordering::Relaxed);
    }

    /// Makes the next `count` operations fail with `Unavailable`.
    pub fn fail_next(&self, count: usize) {
        self.failures_pending.store(count, Ordering::SeqCst);
    }

    /// Returns how often each operation has been called so far.
    pub fn calls(&self) -> CallCounts {
        CallCounts {
            session_metadata: self.metadata_calls.load(Ordering::SeqCst),
            list_roster: self.roster_calls.load(Ordering::SeqCst),
            latest_snapshots: self.snapshot_calls.load(Ordering::SeqCst),
        }
    }

    /// Counts the call, sleeps for the configured latency, then consumes an
    /// injected failure if one is pending.
    async fn enter(&self, counter: &AtomicUsize, op: &str) -> Result<(), StoreError> {
        counter.fetch_add(1, Ordering::SeqCst);

        let ms = self.latency_ms.load(Ordering::Relaxed);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        let failed = self
            .failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            tracing::debug!(op, "injected storage failure");
            return Err(StoreError::Unavailable(format!("injected failure in {op}")));
        }
        Ok(())
    }

    fn read<T>(
        &self,
        session_id: SessionId,
        f: impl FnOnce(&SessionRecord) -> T,
    ) -> Result<T, StoreError> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions
            .get(&session_id)
            .map(f)
            .ok_or(StoreError::SessionNotFound(session_id))
    }
}

impl BattleStore for MemoryStore {
    async fn session_metadata(&self, session_id: SessionId) -> Result<SessionMetadata, StoreError> {
        self.enter(&self.metadata_calls, "session_metadata").await?;
        self.read(session_id, |r| r.metadata.clone())
    }

    async fn list_roster(&self, session_id: SessionId) -> Result<Vec<RosterEntry>, StoreError> {
        self.enter(&self.roster_calls, "list_roster").await?;
        self.read(session_id, |r| r.roster.clone())
    }

    async fn latest_snapshots(
        &self,
        session_id: SessionId,
    ) -> Result<HashMap<PlayerId, CombatSnapshot>, StoreError> {
        self.enter(&self.snapshot_calls, "latest_snapshots").await?;
        self.read(session_id, |r| r.snapshots.clone())
    }
}
