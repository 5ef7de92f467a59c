//! Error types for the persistence gateway.

use std::path::PathBuf;

use geobattle_protocol::SessionId;

/// Errors returned by a [`BattleStore`](crate::BattleStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No durable record exists for the session.
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    /// Reading or writing the backing medium failed.
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A stored document exists but cannot be decoded.
    #[error("malformed session document {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The store refused or could not serve the request right now.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// `true` for [`StoreError::SessionNotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SessionNotFound(_))
    }
}
