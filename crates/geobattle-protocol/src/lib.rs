//! Wire protocol for geobattle.
//!
//! - **Identifiers** ([`SessionId`], [`PlayerId`], [`PositionId`]) shared by
//!   every layer above this one.
//! - **Types** ([`Envelope`], [`SystemMessage`], [`SessionView`], etc.): the
//!   structures that travel on a live battle connection.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): bytes in, types out.
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope) → Session (roster, connections)
//! ```
//!
//! Battle messages (move, attack, ...) travel as opaque [`Payload::Game`]
//! bytes; this crate never interprets them.

mod codec;
mod error;
mod ids;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use ids::{PlayerId, PositionId, SessionId};
pub use types::{
    Channel, Envelope, Payload, PlayerStateView, SessionStatus, SessionView,
    SystemMessage,
};

/// The current protocol version. Clients must send this in their
/// handshake or be rejected.
pub const PROTOCOL_VERSION: u32 = 1;
