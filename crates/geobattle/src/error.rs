//! Unified error type for the geobattle server.

use geobattle_protocol::ProtocolError;
use geobattle_session::{AuthError, LoadError, RegistryError, SessionError};
use geobattle_store::StoreError;
use geobattle_transport::TransportError;

use crate::ConfigError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum GeobattleError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, malformed handshake).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Durable storage could not be opened or read.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The session could not be made resident.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Attach was refused by the session.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The client's credential was rejected.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Invalid server configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl GeobattleError {
    /// The code sent to the client in a `SystemMessage::Error` frame when
    /// this error ends a connection attempt.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Protocol(_) => 400,
            Self::Auth(_) => 401,
            Self::Session(SessionError::PlayerNotInRoster { .. }) => 403,
            Self::Session(SessionError::AlreadyConnected { .. }) => 409,
            Self::Session(SessionError::SessionClosed(_)) => 503,
            Self::Registry(RegistryError::AtCapacity { .. }) => 503,
            Self::Registry(RegistryError::LoadFailure(e)) => match **e {
                LoadError::SessionNotFound(_) => 404,
                LoadError::Storage { .. } | LoadError::Interrupted { .. } => 503,
            },
            Self::Transport(_) | Self::Store(_) | Self::Config(_) => 500,
        }
    }
}
