//! A rostered player's in-memory combat state.

use geobattle_protocol::{PlayerId, PlayerStateView, PositionId};

/// One player of a battle session.
///
/// Owned by exactly one [`BattleSession`](crate::BattleSession). Seeded at
/// load time from the latest persisted snapshot (or the ruleset defaults)
/// and mutated afterwards by battle logic through
/// [`BattleSession::update_player`](crate::BattleSession::update_player).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPlayer {
    pub player_id: PlayerId,
    pub role: String,
    pub hp: i32,
    pub mp: i32,
    pub stance: String,
    pub last_position_id: Option<PositionId>,
}

impl From<&SessionPlayer> for PlayerStateView {
    fn from(player: &SessionPlayer) -> Self {
        Self {
            player_id: player.player_id,
            role: player.role.clone(),
            hp: player.hp,
            mp: player.mp,
            stance: player.stance.clone(),
            last_position_id: player.last_position_id,
        }
    }
}
