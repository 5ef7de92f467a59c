//! # Geobattle
//!
//! Real-time battle server for a location-based mobile game.
//!
//! Players of one battle connect over WebSockets, each naming the battle
//! session they belong to. The server keeps every active battle resident in
//! memory, hydrating it from durable storage on first reference, and
//! multiplexes each player's live connection onto it:
//!
//! ```text
//!   accept ─→ handshake ─→ GetOrLoad(session) ─→ Attach(player, conn)
//!                                                      │
//!                       read loop (heartbeats, battle frames) ←┘
//!                                                      │
//!            close / shutdown / superseded ─→ Detach(player, conn)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use geobattle::prelude::*;
//!
//! struct DevAuth;
//!
//! impl Authenticator for DevAuth {
//!     async fn authenticate(&self, token: &str) -> Result<PlayerId, AuthError> {
//!         token.parse().map_err(|_| AuthError("bad token".into()))
//!     }
//! }
//!
//! # async fn run() -> Result<(), GeobattleError> {
//! let store = Arc::new(JsonDirStore::open("./data/sessions").await?);
//! let server = GeobattleServer::builder()
//!     .bind("0.0.0.0:8080")
//!     .build(store, DevAuth)
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod multiplexer;
mod phase;
mod server;
pub mod telemetry;

pub use config::{ConfigError, ServerConfig};
pub use error::GeobattleError;
pub use multiplexer::{AttachedConnection, ConnectionMultiplexer, DetachReason};
pub use phase::ConnectionPhase;
pub use server::{BattleFrame, GeobattleServer, GeobattleServerBuilder};

/// Everything needed to run a server, in one import.
pub mod prelude {
    pub use geobattle_protocol::{
        Codec, Envelope, JsonCodec, Payload, PlayerId, PlayerStateView, SessionId, SessionStatus,
        SessionView, SystemMessage, PROTOCOL_VERSION,
    };
    pub use geobattle_session::{
        AuthError, Authenticator, BattleSession, ReconnectPolicy, RegistryConfig, RulesetDefaults,
        SessionRegistry, StartingStats,
    };
    pub use geobattle_store::{BattleStore, JsonDirStore, MemoryStore, SessionRecord};
    pub use geobattle_transport::{Connection, ConnectionId, WebSocketConnection};
    pub use tokio_util::sync::CancellationToken;

    pub use crate::{
        BattleFrame, ConnectionMultiplexer, DetachReason, GeobattleError, GeobattleServer,
        GeobattleServerBuilder, ServerConfig,
    };
}
