//! The lifecycle of one inbound connection.

use std::fmt;

/// Where a connection is in its life.
///
/// ```text
///   Connecting ──→ Attached ──→ Reading ──→ Detached
///       │              │                       ↑
///       └──────────────┴──────(failure)────────┘
/// ```
///
/// - **Connecting**: identifiers are parsed and validated, the session is
///   looked up and the player attached. Nothing is registered yet.
/// - **Attached**: the player's slot holds this connection.
/// - **Reading**: the read loop owns the connection.
/// - **Detached**: terminal. The slot no longer holds this connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionPhase {
    Connecting,
    Attached,
    Reading,
    Detached,
}

impl ConnectionPhase {
    /// The next phase on the success path, or `None` once detached.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Connecting => Some(Self::Attached),
            Self::Attached => Some(Self::Reading),
            Self::Reading => Some(Self::Detached),
            Self::Detached => None,
        }
    }

    /// Returns `true` if moving to `target` is valid.
    ///
    /// Besides the success path, any live phase may fail straight to
    /// `Detached`.
    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == Some(target) || (target == Self::Detached && !self.is_terminal())
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Detached
    }
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Attached => write!(f, "Attached"),
            Self::Reading => write!(f, "Reading"),
            Self::Detached => write!(f, "Detached"),
        }
    }
}
