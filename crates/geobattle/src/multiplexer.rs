//! Binding live connections to battle sessions.
//!
//! The [`ConnectionMultiplexer`] is the single entry point the connection
//! handler uses to move a connection through its lifecycle:
//!
//! - [`attach_connection`](ConnectionMultiplexer::attach_connection):
//!   `Connecting → Attached`. Looks the session up (hydrating it if cold)
//!   and attaches the player.
//! - [`release`](ConnectionMultiplexer::release): `Reading → Detached`.
//!   Detaches the player's slot if it still holds this connection, then
//!   closes the transport unless someone else already did.
//!
//! A connection never points back at its session; the multiplexer hands the
//! caller an [`AttachedConnection`] holding both, and the session only holds
//! connection handles.

use std::fmt;
use std::sync::Arc;

use geobattle_protocol::{PlayerId, SessionId, SessionView};
use geobattle_session::{BattleSession, SessionError, SessionPlayer, SessionRegistry};
use geobattle_store::BattleStore;
use geobattle_transport::{Connection, ConnectionId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::GeobattleError;

/// How often an attach that raced an eviction is retried.
const MAX_ATTACH_ATTEMPTS: usize = 3;

// ---------------------------------------------------------------------------
// DetachReason
// ---------------------------------------------------------------------------

/// Why a connection left the `Reading` phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachReason {
    /// The client closed the transport cleanly.
    ClientClosed,
    /// The client sent `Disconnect`.
    ClientRequested,
    /// Reading from or writing to the transport failed.
    TransportFailed,
    /// Nothing arrived within the read idle timeout.
    IdleTimeout,
    /// The server is shutting down.
    Shutdown,
    /// The session was evicted; eviction already closed the transport.
    Evicted,
    /// A newer connection for the same player replaced this one and already
    /// closed it. Not an error.
    ConnectionSuperseded,
}

impl DetachReason {
    /// Whether releasing the connection must still close its transport.
    pub fn closes_transport(self) -> bool {
        !matches!(self, Self::Evicted | Self::ConnectionSuperseded)
    }
}

impl fmt::Display for DetachReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientClosed => write!(f, "client closed"),
            Self::ClientRequested => write!(f, "client requested"),
            Self::TransportFailed => write!(f, "transport failed"),
            Self::IdleTimeout => write!(f, "idle timeout"),
            Self::Shutdown => write!(f, "server shutdown"),
            Self::Evicted => write!(f, "session evicted"),
            Self::ConnectionSuperseded => write!(f, "connection superseded"),
        }
    }
}

// ---------------------------------------------------------------------------
// AttachedConnection
// ---------------------------------------------------------------------------

/// A connection that has been attached to a player's slot.
#[derive(Debug)]
pub struct AttachedConnection<C> {
    pub session: Arc<BattleSession<C>>,
    pub conn: Arc<C>,
    /// The player's state at attach time.
    pub player: SessionPlayer,
    /// The session as seen right after the attach.
    pub view: SessionView,
    superseded: CancellationToken,
}

impl<C: Connection> AttachedConnection<C> {
    pub fn session_id(&self) -> SessionId {
        self.session.id()
    }

    pub fn player_id(&self) -> PlayerId {
        self.player.player_id
    }

    pub fn conn_id(&self) -> ConnectionId {
        self.conn.id()
    }

    /// Fires when this connection is no longer the player's registered
    /// handle because a newer attach or an eviction replaced it.
    pub fn superseded(&self) -> &CancellationToken {
        &self.superseded
    }

    /// The reason to report once [`superseded`](Self::superseded) fired.
    pub fn superseded_reason(&self) -> DetachReason {
        if self.session.is_closed() {
            DetachReason::Evicted
        } else {
            DetachReason::ConnectionSuperseded
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectionMultiplexer
// ---------------------------------------------------------------------------

/// Attaches and detaches connections on top of a [`SessionRegistry`].
pub struct ConnectionMultiplexer<S, C> {
    registry: SessionRegistry<S, C>,
}

impl<S, C> Clone for ConnectionMultiplexer<S, C> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<S: BattleStore, C: Connection> ConnectionMultiplexer<S, C> {
    pub fn new(registry: SessionRegistry<S, C>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SessionRegistry<S, C> {
        &self.registry
    }

    /// Makes `session_id` resident and attaches `conn` as `player_id`.
    ///
    /// On failure nothing is registered and the connection is left open so
    /// the caller can report the error to the client before closing it. An
    /// attach that loses a race with eviction is retried against the fresh
    /// session instance.
    pub async fn attach_connection(
        &self,
        session_id: SessionId,
        player_id: PlayerId,
        conn: Arc<C>,
    ) -> Result<AttachedConnection<C>, GeobattleError> {
        let session = self.registry.get_or_load(session_id).await?;
        self.attach_from(session, player_id, conn).await
    }

    /// Attaches to `session`, looking the id up again whenever the instance
    /// turns out to be closed by an eviction.
    async fn attach_from(
        &self,
        mut session: Arc<BattleSession<C>>,
        player_id: PlayerId,
        conn: Arc<C>,
    ) -> Result<AttachedConnection<C>, GeobattleError> {
        let session_id = session.id();
        let mut attempt = 1;
        loop {
            match session.attach(player_id, Arc::clone(&conn)).await {
                Ok(attached) => {
                    let view = session.snapshot().await;
                    return Ok(AttachedConnection {
                        session,
                        conn,
                        player: attached.player,
                        view,
                        superseded: attached.superseded,
                    });
                }
                Err(SessionError::SessionClosed(_)) if attempt < MAX_ATTACH_ATTEMPTS => {
                    debug!(%session_id, %player_id, attempt, "session closed during attach, retrying");
                    attempt += 1;
                    session = self.registry.get_or_load(session_id).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Detaches `conn_id` from `player_id`'s slot in a resident session.
    ///
    /// Returns `true` if the slot held that connection. A stale or repeated
    /// detach, or one for a session that is not resident, is a no-op.
    pub async fn detach_connection(
        &self,
        session_id: SessionId,
        player_id: PlayerId,
        conn_id: ConnectionId,
    ) -> bool {
        match self.registry.get(session_id).await {
            Some(session) => session.detach(player_id, conn_id).await,
            None => false,
        }
    }

    /// Moves an attached connection to `Detached`.
    ///
    /// Always detaches through the session so its connection table stays
    /// consistent, then closes the transport unless `reason` says it was
    /// already closed by whoever replaced it.
    pub async fn release(&self, attached: AttachedConnection<C>, reason: DetachReason) {
        let session_id = attached.session_id();
        let player_id = attached.player_id();
        let conn_id = attached.conn_id();

        attached.session.detach(player_id, conn_id).await;

        match reason {
            DetachReason::TransportFailed => {
                warn!(%session_id, %player_id, %conn_id, %reason, "connection released");
            }
            DetachReason::ConnectionSuperseded | DetachReason::Evicted => {
                debug!(%session_id, %player_id, %conn_id, %reason, "connection released");
            }
            _ => info!(%session_id, %player_id, %conn_id, %reason, "connection released"),
        }

        if reason.closes_transport() {
            if let Err(e) = attached.conn.close().await {
                debug!(%conn_id, error = %e, "closing connection failed");
            }
        }
    }
}
