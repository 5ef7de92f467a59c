//! Configuration for the session layer.
//!
//! Plain structs with sensible defaults. Build one with `::default()` and
//! override just the fields you care about.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Ruleset defaults
// ---------------------------------------------------------------------------

/// Combat values a player starts with when no snapshot exists yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartingStats {
    pub hp: i32,
    pub mp: i32,
    pub stance: String,
}

impl Default for StartingStats {
    fn default() -> Self {
        Self {
            hp: 100,
            mp: 100,
            stance: "neutral".to_string(),
        }
    }
}

/// Starting stats per battle mode.
///
/// A rostered player without a persisted snapshot is initialized from the
/// entry for the session's mode, or from `fallback` when the mode has no
/// entry of its own.
#[derive(Debug, Clone, Default)]
pub struct RulesetDefaults {
    pub fallback: StartingStats,
    pub per_mode: HashMap<String, StartingStats>,
}

impl RulesetDefaults {
    /// Overrides the starting stats of one mode.
    pub fn with_mode(mut self, mode: impl Into<String>, stats: StartingStats) -> Self {
        self.per_mode.insert(mode.into(), stats);
        self
    }

    /// Starting stats for `mode`.
    pub fn for_mode(&self, mode: &str) -> &StartingStats {
        self.per_mode.get(mode).unwrap_or(&self.fallback)
    }
}

// ---------------------------------------------------------------------------
// Reconnect policy
// ---------------------------------------------------------------------------

/// What happens when a player attaches while an older connection of theirs
/// is still registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectPolicy {
    /// Last attach wins: the older connection is closed and replaced.
    /// Mobile clients drop and redial often; the stale socket is usually
    /// already dead from the client's point of view.
    #[default]
    Supersede,

    /// The second attach fails with
    /// [`SessionError::AlreadyConnected`](crate::SessionError::AlreadyConnected).
    Reject,
}

impl fmt::Display for ReconnectPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Supersede => write!(f, "supersede"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

/// A reconnect policy name that is neither `supersede` nor `reject`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown reconnect policy {0:?} (expected \"supersede\" or \"reject\")")]
pub struct UnknownReconnectPolicy(pub String);

impl FromStr for ReconnectPolicy {
    type Err = UnknownReconnectPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "supersede" => Ok(Self::Supersede),
            "reject" => Ok(Self::Reject),
            _ => Err(UnknownReconnectPolicy(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// RegistryConfig
// ---------------------------------------------------------------------------

/// Configuration for a [`SessionRegistry`](crate::SessionRegistry).
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Upper bound on resident plus currently loading sessions. A lookup of
    /// a cold session beyond this bound is rejected.
    ///
    /// Default: 1024.
    pub max_resident_sessions: usize,

    /// Reconnect behavior applied by every session of this registry.
    pub reconnect_policy: ReconnectPolicy,

    /// Starting stats for players without a snapshot.
    pub ruleset: RulesetDefaults,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_resident_sessions: 1024,
            reconnect_policy: ReconnectPolicy::default(),
            ruleset: RulesetDefaults::default(),
        }
    }
}
