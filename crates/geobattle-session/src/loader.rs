//! Hydrating battle sessions from durable state.

use std::collections::HashSet;
use std::sync::Arc;

use geobattle_protocol::SessionId;
use geobattle_store::BattleStore;
use geobattle_transport::Connection;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{BattleSession, LoadError, ReconnectPolicy, RulesetDefaults, SessionPlayer};

/// Translates durable session state into a [`BattleSession`].
///
/// Depends only on the [`BattleStore`] abstraction, so tests can hand it a
/// [`MemoryStore`](geobattle_store::MemoryStore).
#[derive(Debug)]
pub struct SessionLoader<S> {
    store: Arc<S>,
    ruleset: RulesetDefaults,
    policy: ReconnectPolicy,
}

impl<S: BattleStore> SessionLoader<S> {
    pub fn new(store: Arc<S>, ruleset: RulesetDefaults) -> Self {
        Self {
            store,
            ruleset,
            policy: ReconnectPolicy::default(),
        }
    }

    /// Sets the reconnect policy given to every loaded session.
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Reads metadata, roster and latest snapshots for `session_id` and
    /// assembles a session with an empty connection table.
    ///
    /// A player without a snapshot starts from the ruleset defaults of the
    /// session's mode. A player listed twice keeps its first roster entry.
    /// Snapshots of players outside the roster are ignored.
    /// Missing metadata fails with [`LoadError::SessionNotFound`]; any other
    /// storage failure with [`LoadError::Storage`].
    pub async fn load<C: Connection>(
        &self,
        session_id: SessionId,
    ) -> Result<BattleSession<C>, LoadError> {
        let started = Instant::now();
        let store_err = |e| LoadError::from_store(session_id, e);

        let metadata = self
            .store
            .session_metadata(session_id)
            .await
            .map_err(store_err)?;

        let (roster, mut snapshots) = tokio::try_join!(
            self.store.list_roster(session_id),
            self.store.latest_snapshots(session_id),
        )
        .map_err(store_err)?;

        let defaults = self.ruleset.for_mode(&metadata.mode);
        let mut seen = HashSet::with_capacity(roster.len());
        let players: Vec<SessionPlayer> = roster
            .into_iter()
            .filter(|entry| {
                let first = seen.insert(entry.player_id);
                if !first {
                    warn!(%session_id, player_id = %entry.player_id, role = %entry.role, "ignoring duplicate roster entry");
                }
                first
            })
            .map(|entry| match snapshots.remove(&entry.player_id) {
                Some(snap) => SessionPlayer {
                    player_id: entry.player_id,
                    role: entry.role,
                    hp: snap.hp,
                    mp: snap.mp,
                    stance: snap.stance,
                    last_position_id: snap.last_position_id,
                },
                None => SessionPlayer {
                    player_id: entry.player_id,
                    role: entry.role,
                    hp: defaults.hp,
                    mp: defaults.mp,
                    stance: defaults.stance.clone(),
                    last_position_id: None,
                },
            })
            .collect();

        if !snapshots.is_empty() {
            debug!(%session_id, orphaned = snapshots.len(), "ignoring snapshots of players outside the roster");
        }

        info!(
            %session_id,
            mode = %metadata.mode,
            status = %metadata.status,
            players = players.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "session hydrated"
        );

        Ok(BattleSession::new(
            session_id,
            metadata.mode,
            metadata.status,
            players,
            self.policy,
        ))
    }
}
