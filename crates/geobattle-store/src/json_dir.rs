//! Durable [`BattleStore`] backed by a directory of JSON documents.
//!
//! Layout: `<root>/<session-id>.json`, each file one [`SessionRecord`].
//! Writes go through a temporary file and a rename so a reader never sees
//! a half-written document.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use geobattle_protocol::{PlayerId, SessionId};

use crate::{BattleStore, CombatSnapshot, RosterEntry, SessionMetadata, SessionRecord, StoreError};

/// A [`BattleStore`] reading one JSON document per session from disk.
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    root: PathBuf,
}

impl JsonDirStore {
    /// Opens (and creates, if missing) the data directory.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        tracing::info!(root = %root.display(), "session document store opened");
        Ok(Self { root })
    }

    /// The data directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, session_id: SessionId) -> PathBuf {
        self.root.join(format!("{session_id}.json"))
    }

    /// Writes (or replaces) a session document.
    ///
    /// Used for seeding by tooling and tests; the battle core only reads.
    pub async fn put_session(
        &self,
        session_id: SessionId,
        record: &SessionRecord,
    ) -> Result<(), StoreError> {
        let path = self.path_for(session_id);
        let bytes = serde_json::to_vec_pretty(record).map_err(|source| StoreError::Malformed {
            path: path.clone(),
            source,
        })?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!(%session_id, "session document written");
        Ok(())
    }

    async fn read_record(&self, session_id: SessionId) -> Result<SessionRecord, StoreError> {
        let path = self.path_for(session_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::SessionNotFound(session_id));
            }
            Err(e) => return Err(StoreError::Io(e)),
        };
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Malformed { path, source })
    }
}

impl BattleStore for JsonDirStore {
    async fn session_metadata(&self, session_id: SessionId) -> Result<SessionMetadata, StoreError> {
        Ok(self.read_record(session_id).await?.metadata)
    }

    async fn list_roster(&self, session_id: SessionId) -> Result<Vec<RosterEntry>, StoreError> {
        Ok(self.read_record(session_id).await?.roster)
    }

    async fn latest_snapshots(
        &self,
        session_id: SessionId,
    ) -> Result<HashMap<PlayerId, CombatSnapshot>, StoreError> {
        Ok(self.read_record(session_id).await?.snapshots)
    }
}
