//! Error types for the session layer.

use std::sync::Arc;

use geobattle_protocol::{PlayerId, SessionId};
use geobattle_store::StoreError;

/// Hydrating a session from durable storage failed.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// No durable session record exists. Not retried internally.
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    /// A transient storage problem. Never cached; the next attach retries.
    #[error("loading session {session_id} failed: {source}")]
    Storage {
        session_id: SessionId,
        #[source]
        source: StoreError,
    },

    /// The hydration task ended without producing a result (it panicked or
    /// the runtime is shutting down).
    #[error("loading session {session_id} was interrupted: {reason}")]
    Interrupted { session_id: SessionId, reason: String },
}

impl LoadError {
    /// Classifies a store error raised while loading `session_id`.
    pub(crate) fn from_store(session_id: SessionId, source: StoreError) -> Self {
        match source {
            StoreError::SessionNotFound(_) => Self::SessionNotFound(session_id),
            source => Self::Storage { session_id, source },
        }
    }
}

/// Errors from attach/detach on a resident [`BattleSession`](crate::BattleSession).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The player is not part of the session's roster. A client-side
    /// contract violation; never retried.
    #[error("player {player_id} is not in the roster of session {session_id}")]
    PlayerNotInRoster {
        session_id: SessionId,
        player_id: PlayerId,
    },

    /// The player already has a live connection and the registry runs
    /// with [`ReconnectPolicy::Reject`](crate::ReconnectPolicy::Reject).
    #[error("player {player_id} is already connected to session {session_id}")]
    AlreadyConnected {
        session_id: SessionId,
        player_id: PlayerId,
    },

    /// Eviction has started closing this session instance. Looking the
    /// session up again yields a fresh instance.
    #[error("session {0} is closed")]
    SessionClosed(SessionId),
}

/// Errors from [`SessionRegistry`](crate::SessionRegistry).
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    /// Hydration failed. Every caller that waited on the same load gets the
    /// same shared error.
    #[error("load failure: {0}")]
    LoadFailure(Arc<LoadError>),

    /// Too many sessions are resident or loading.
    #[error("session registry at capacity ({limit} sessions)")]
    AtCapacity { limit: usize },
}

impl RegistryError {
    /// `true` when the underlying cause is a missing session record.
    pub fn is_session_not_found(&self) -> bool {
        matches!(self, Self::LoadFailure(e) if matches!(**e, LoadError::SessionNotFound(_)))
    }
}

/// The [`Authenticator`](crate::Authenticator) rejected a credential.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("authentication failed: {0}")]
pub struct AuthError(pub String);
