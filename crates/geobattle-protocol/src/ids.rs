//! Identifier newtypes.
//!
//! Sessions, players and positions are all keyed by UUIDs in durable
//! storage. Wrapping each in its own type means a `PlayerId` can never be
//! passed where a `SessionId` is expected. On the wire they are plain UUID
//! strings (`#[serde(transparent)]`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ProtocolError;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
            Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generates a fresh random identifier.
            pub fn new_v4() -> Self {
                Self(Uuid::new_v4())
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = ProtocolError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self).map_err(|source| {
                    ProtocolError::InvalidId {
                        value: s.to_string(),
                        source,
                    }
                })
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(
    /// Identifies one multiplayer battle (a `game_sessions` row).
    SessionId
);

uuid_id!(
    /// Identifies a player account.
    PlayerId
);

uuid_id!(
    /// Identifies a recorded player position (the last one known for a
    /// player is part of its combat snapshot).
    PositionId
);
