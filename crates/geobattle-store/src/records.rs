//! Record shapes read from durable storage.

use std::collections::HashMap;

use geobattle_protocol::{PlayerId, PositionId, SessionStatus};
use serde::{Deserialize, Serialize};

/// Mode and status of a battle session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Ruleset tag, e.g. `"duel"`.
    pub mode: String,
    pub status: SessionStatus,
}

/// One roster row: a player and the role they play in this session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub player_id: PlayerId,
    pub role: String,
}

/// The last persisted combat values for a player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatSnapshot {
    pub hp: i32,
    pub mp: i32,
    pub stance: String,
    #[serde(default)]
    pub last_position_id: Option<PositionId>,
}

/// Everything stored about one session, as a single document.
///
/// This is the on-disk format of [`JsonDirStore`](crate::JsonDirStore) and
/// the seed format of [`MemoryStore`](crate::MemoryStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub metadata: SessionMetadata,
    pub roster: Vec<RosterEntry>,
    #[serde(default)]
    pub snapshots: HashMap<PlayerId, CombatSnapshot>,
}

impl SessionRecord {
    /// Starts a record with an empty roster.
    pub fn new(mode: impl Into<String>, status: SessionStatus) -> Self {
        Self {
            metadata: SessionMetadata {
                mode: mode.into(),
                status,
            },
            roster: Vec::new(),
            snapshots: HashMap::new(),
        }
    }

    /// Appends a player to the roster.
    pub fn with_player(mut self, player_id: PlayerId, role: impl Into<String>) -> Self {
        self.roster.push(RosterEntry {
            player_id,
            role: role.into(),
        });
        self
    }

    /// Records the latest combat snapshot of a player.
    pub fn with_snapshot(mut self, player_id: PlayerId, snapshot: CombatSnapshot) -> Self {
        self.snapshots.insert(player_id, snapshot);
        self
    }
}
