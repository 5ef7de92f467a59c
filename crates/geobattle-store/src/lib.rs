//! Persistence gateway for geobattle.
//!
//! The session layer never talks to a database directly. It reads the three
//! things it needs to hydrate a battle through the [`BattleStore`] trait:
//!
//! 1. session metadata (mode, status),
//! 2. the roster (who plays, in which role),
//! 3. the latest combat snapshot per player (may be missing).
//!
//! Two implementations ship with the crate: [`JsonDirStore`], a durable
//! store keeping one JSON document per session on disk, and [`MemoryStore`],
//! an in-memory fake with call counting, latency and failure injection for
//! tests.

mod error;
mod json_dir;
mod memory;
mod records;

use std::collections::HashMap;
use std::future::Future;

use geobattle_protocol::{PlayerId, SessionId};

pub use error::StoreError;
pub use json_dir::JsonDirStore;
pub use memory::{CallCounts, MemoryStore};
pub use records::{CombatSnapshot, RosterEntry, SessionMetadata, SessionRecord};

/// Read access to durable battle-session state.
///
/// Futures are `Send` so hydration can run on its own task.
pub trait BattleStore: Send + Sync + 'static {
    /// Mode and status of a session.
    ///
    /// Fails with [`StoreError::SessionNotFound`] when no record exists.
    fn session_metadata(
        &self,
        session_id: SessionId,
    ) -> impl Future<Output = Result<SessionMetadata, StoreError>> + Send;

    /// The session's players, in roster order.
    fn list_roster(
        &self,
        session_id: SessionId,
    ) -> impl Future<Output = Result<Vec<RosterEntry>, StoreError>> + Send;

    /// The most recent combat snapshot of each player that has one.
    fn latest_snapshots(
        &self,
        session_id: SessionId,
    ) -> impl Future<Output = Result<HashMap<PlayerId, CombatSnapshot>, StoreError>>
    + Send;
}
