//! The battle session: one active battle's roster and connection table.
//!
//! A [`BattleSession`] owns:
//! - its identity (session id, mode, status), fixed at load time
//! - its roster, a list of [`SessionPlayer`]s in roster order
//! - a connection table mapping player ids to live connection handles
//!
//! All mutation goes through one per-session lock. Sessions never touch
//! each other's lock, so unrelated battles never contend. The lock is never
//! held across I/O: handles that must be closed or written to are copied
//! out first and used after the lock is released.
//!
//! ```text
//!   Attach(p, c1) ──→ { p → c1 }
//!   Attach(p, c2) ──→ { p → c2 }   c1 closed, c1's supersede signal fired
//!   Detach(p, c1) ──→ { p → c2 }   stale handle, no-op
//!   Detach(p, c2) ──→ { }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use geobattle_protocol::{PlayerId, PlayerStateView, SessionId, SessionStatus, SessionView};
use geobattle_transport::{Connection, ConnectionId};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{ReconnectPolicy, SessionError, SessionPlayer};

// ---------------------------------------------------------------------------
// Attach result
// ---------------------------------------------------------------------------

/// A successful attach.
#[derive(Debug, Clone)]
pub struct Attached {
    /// The player's current state, for seeding the client.
    pub player: SessionPlayer,

    /// Fires when this connection stops being the player's registered
    /// handle without the owner detaching it: a later attach superseded it,
    /// or eviction closed the session.
    pub superseded: CancellationToken,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

/// One connection table entry.
#[derive(Debug)]
struct Slot<C> {
    conn: Arc<C>,
    superseded: CancellationToken,
}

#[derive(Debug)]
struct SessionState<C> {
    players: Vec<SessionPlayer>,
    connections: HashMap<PlayerId, Slot<C>>,
    /// When the connection table last became empty. `None` while anyone is
    /// connected.
    idle_since: Option<Instant>,
}

impl<C> SessionState<C> {
    fn player(&self, player_id: &PlayerId) -> Option<&SessionPlayer> {
        self.players.iter().find(|p| p.player_id == *player_id)
    }

    fn connected_in_roster_order(&self) -> Vec<PlayerId> {
        self.players
            .iter()
            .map(|p| p.player_id)
            .filter(|id| self.connections.contains_key(id))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// BattleSession
// ---------------------------------------------------------------------------

/// In-memory state for one active battle.
///
/// Created by the [`SessionLoader`](crate::SessionLoader) with an empty
/// connection table; shared as `Arc<BattleSession<C>>` by the registry and
/// every connection task attached to it.
#[derive(Debug)]
pub struct BattleSession<C> {
    id: SessionId,
    mode: String,
    status: SessionStatus,
    policy: ReconnectPolicy,
    /// Set once, under the state lock, when eviction starts closing this
    /// instance. Also readable without the lock.
    closed: AtomicBool,
    state: Mutex<SessionState<C>>,
}

impl<C: Connection> BattleSession<C> {
    pub(crate) fn new(
        id: SessionId,
        mode: String,
        status: SessionStatus,
        players: Vec<SessionPlayer>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            id,
            mode,
            status,
            policy,
            closed: AtomicBool::new(false),
            state: Mutex::new(SessionState {
                players,
                connections: HashMap::new(),
                idle_since: Some(Instant::now()),
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn mode(&self) -> &str {
        &self.mode
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// `true` once eviction has started closing this instance.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // -----------------------------------------------------------------------
    // Attach / detach
    // -----------------------------------------------------------------------

    /// Binds `conn` to `player_id`'s slot.
    ///
    /// Fails with [`SessionError::PlayerNotInRoster`] for players outside
    /// the roster, without touching the connection table. If the player
    /// already has a different connection, the policy decides: under
    /// [`ReconnectPolicy::Supersede`] the old handle is replaced, its
    /// supersede signal fired and the handle closed before this returns;
    /// under [`ReconnectPolicy::Reject`] the attach fails with
    /// [`SessionError::AlreadyConnected`]. Attaching the handle that is
    /// already registered is a no-op that returns the existing signal.
    pub async fn attach(&self, player_id: PlayerId, conn: Arc<C>) -> Result<Attached, SessionError> {
        let conn_id = conn.id();

        let (attached, replaced) = {
            let mut state = self.state.lock().await;

            if self.is_closed() {
                return Err(SessionError::SessionClosed(self.id));
            }

            let Some(player) = state.player(&player_id).cloned() else {
                return Err(SessionError::PlayerNotInRoster {
                    session_id: self.id,
                    player_id,
                });
            };

            if let Some(existing) = state.connections.get(&player_id) {
                if existing.conn.id() == conn_id {
                    return Ok(Attached {
                        player,
                        superseded: existing.superseded.clone(),
                    });
                }
                if self.policy == ReconnectPolicy::Reject {
                    return Err(SessionError::AlreadyConnected {
                        session_id: self.id,
                        player_id,
                    });
                }
            }

            let superseded = CancellationToken::new();
            let slot = Slot {
                conn,
                superseded: superseded.clone(),
            };
            let replaced = state.connections.insert(player_id, slot);
            state.idle_since = None;

            if let Some(old) = &replaced {
                old.superseded.cancel();
            }

            (Attached { player, superseded }, replaced)
        };

        match replaced {
            Some(old) => {
                let old_id = old.conn.id();
                info!(
                    session_id = %self.id,
                    %player_id,
                    %conn_id,
                    superseded = %old_id,
                    "player reconnected, superseding previous connection"
                );
                if let Err(e) = old.conn.close().await {
                    debug!(conn_id = %old_id, error = %e, "closing superseded connection failed");
                }
            }
            None => info!(session_id = %self.id, %player_id, %conn_id, "player attached"),
        }

        Ok(attached)
    }

    /// Removes `player_id`'s entry if, and only if, it still holds the
    /// connection `conn_id`.
    ///
    /// Returns `true` when an entry was removed. A stale handle (a newer
    /// attach won) or an already detached player is a no-op. Closing the
    /// connection is the caller's job.
    pub async fn detach(&self, player_id: PlayerId, conn_id: ConnectionId) -> bool {
        let mut state = self.state.lock().await;

        let matches = state
            .connections
            .get(&player_id)
            .is_some_and(|slot| slot.conn.id() == conn_id);
        if !matches {
            debug!(session_id = %self.id, %player_id, %conn_id, "stale or repeated detach ignored");
            return false;
        }

        state.connections.remove(&player_id);
        if state.connections.is_empty() {
            state.idle_since = Some(Instant::now());
        }
        drop(state);

        info!(session_id = %self.id, %player_id, %conn_id, "player detached");
        true
    }

    // -----------------------------------------------------------------------
    // Read-only views
    // -----------------------------------------------------------------------

    /// A copy of the session's roster state. Never exposes handles.
    pub async fn snapshot(&self) -> SessionView {
        let state = self.state.lock().await;
        SessionView {
            session_id: self.id,
            mode: self.mode.clone(),
            status: self.status,
            players: state.players.iter().map(PlayerStateView::from).collect(),
            connected: state.connected_in_roster_order(),
        }
    }

    /// A copy of one player's current state.
    pub async fn player(&self, player_id: PlayerId) -> Option<SessionPlayer> {
        self.state.lock().await.player(&player_id).cloned()
    }

    /// Players with a live connection, in roster order.
    pub async fn connected_players(&self) -> Vec<PlayerId> {
        self.state.lock().await.connected_in_roster_order()
    }

    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.connections.len()
    }

    /// Whether `player_id` currently holds the connection `conn_id`.
    pub async fn is_attached(&self, player_id: PlayerId, conn_id: ConnectionId) -> bool {
        self.state
            .lock()
            .await
            .connections
            .get(&player_id)
            .is_some_and(|slot| slot.conn.id() == conn_id)
    }

    /// How long the session has had no connections, if it has none.
    pub async fn idle_for(&self) -> Option<Duration> {
        self.state.lock().await.idle_since.map(|t| t.elapsed())
    }

    // -----------------------------------------------------------------------
    // Battle logic seam
    // -----------------------------------------------------------------------

    /// Applies `f` to a rostered player's state.
    ///
    /// Returns `None` when the player is not in the roster.
    pub async fn update_player<R>(
        &self,
        player_id: PlayerId,
        f: impl FnOnce(&mut SessionPlayer) -> R,
    ) -> Option<R> {
        let mut state = self.state.lock().await;
        state
            .players
            .iter_mut()
            .find(|p| p.player_id == player_id)
            .map(f)
    }

    /// Sends `data` to one player, if connected.
    ///
    /// Returns `Ok(false)` when the player has no live connection.
    pub async fn send_to(&self, player_id: PlayerId, data: &[u8]) -> Result<bool, C::Error> {
        let conn = {
            let state = self.state.lock().await;
            state.connections.get(&player_id).map(|s| Arc::clone(&s.conn))
        };
        match conn {
            Some(conn) => conn.send(data).await.map(|()| true),
            None => Ok(false),
        }
    }

    /// Sends `data` to every connected player.
    ///
    /// Returns how many sends succeeded. A failed send only affects that
    /// player's connection; its read loop will notice and detach.
    pub async fn broadcast(&self, data: &[u8]) -> usize {
        let targets: Vec<(PlayerId, Arc<C>)> = {
            let state = self.state.lock().await;
            state
                .connections
                .iter()
                .map(|(id, s)| (*id, Arc::clone(&s.conn)))
                .collect()
        };

        let mut delivered = 0;
        for (player_id, conn) in targets {
            match conn.send(data).await {
                Ok(()) => delivered += 1,
                Err(e) => debug!(session_id = %self.id, %player_id, error = %e, "broadcast send failed"),
            }
        }
        delivered
    }

    // -----------------------------------------------------------------------
    // Eviction support
    // -----------------------------------------------------------------------

    /// Marks the session closed and closes every live connection.
    ///
    /// Every attached connection's supersede signal fires, so read loops
    /// exit without closing the handle a second time. Later attaches fail
    /// with [`SessionError::SessionClosed`]. Returns the number of
    /// connections closed.
    pub(crate) async fn close_all(&self) -> usize {
        let drained: Vec<(PlayerId, Slot<C>)> = {
            let mut state = self.state.lock().await;
            self.closed.store(true, Ordering::Release);
            let drained: Vec<_> = state.connections.drain().collect();
            if state.idle_since.is_none() {
                state.idle_since = Some(Instant::now());
            }
            drained
        };

        for (_, slot) in &drained {
            slot.superseded.cancel();
        }
        for (player_id, slot) in &drained {
            let conn_id = slot.conn.id();
            if let Err(e) = slot.conn.close().await {
                debug!(session_id = %self.id, %player_id, %conn_id, error = %e, "closing connection on eviction failed");
            }
        }
        drained.len()
    }

    /// Marks the session closed if it has had no connections for at least
    /// `grace`. Checked and marked under one lock acquisition, so an attach
    /// cannot slip in between.
    pub(crate) async fn close_if_idle(&self, grace: Duration) -> bool {
        let state = self.state.lock().await;
        if self.is_closed() || !state.connections.is_empty() {
            return false;
        }
        match state.idle_since {
            Some(since) if since.elapsed() >= grace => {
                self.closed.store(true, Ordering::Release);
                true
            }
            _ => false,
        }
    }
}
