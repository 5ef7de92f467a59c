//! Battle session management for geobattle.
//!
//! This crate keeps the currently active battles resident in memory and
//! multiplexes player connections onto them:
//!
//! 1. **Loading**: [`SessionLoader`] hydrates a [`BattleSession`] from a
//!    [`BattleStore`](geobattle_store::BattleStore).
//! 2. **Residency**: [`SessionRegistry`] maps session ids to resident
//!    sessions, hydrating each cold session exactly once no matter how many
//!    connections race for it, and evicting sessions on request.
//! 3. **Connections**: [`BattleSession`] owns its roster and a table of
//!    live connection handles, one per player at most.
//! 4. **Identity**: [`Authenticator`] turns a client credential into a
//!    [`PlayerId`](geobattle_protocol::PlayerId).
//!
//! # How it fits in the stack
//!
//! ```text
//! Server (above)     ← runs one read loop per connection
//!     ↕
//! Session (this)     ← registry, sessions, rosters, connection tables
//!     ↕
//! Store / Protocol / Transport (below)
//! ```
//!
//! # Locking
//!
//! The registry's directory lock and each session's own lock are never held
//! at the same time, and neither is held across I/O. Hydration runs on a
//! spawned task per session id; callers wait on its shared result.

mod auth;
mod config;
mod error;
mod loader;
mod player;
mod registry;
mod session;

#[cfg(test)]
mod test_support;

pub use auth::Authenticator;
pub use config::{ReconnectPolicy, RegistryConfig, RulesetDefaults, StartingStats, UnknownReconnectPolicy};
pub use error::{AuthError, LoadError, RegistryError, SessionError};
pub use loader::SessionLoader;
pub use player::SessionPlayer;
pub use registry::SessionRegistry;
pub use session::{Attached, BattleSession};
