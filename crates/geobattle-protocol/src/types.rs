//! Core protocol types for geobattle's wire format.
//!
//! Everything here is serialized, sent over a live battle connection, and
//! deserialized on the other side (the mobile client).

use serde::{Deserialize, Serialize};

use crate::{PlayerId, PositionId, SessionId};

// ---------------------------------------------------------------------------
// Channel — delivery guarantees
// ---------------------------------------------------------------------------

/// The delivery guarantee a client asks for on a message.
///
/// This is a client-side hint only. WebSocket delivery is always reliable
/// and ordered, whatever the tag says. The server never changes behavior on
/// it; it passes the tag through to battle logic on each battle frame so
/// that, for example, stale position pings marked `Unreliable` can be
/// discarded there.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "PascalCase")]
pub enum Channel {
    /// Delivered in order, no loss.
    #[default]
    ReliableOrdered,

    /// The sender tolerates loss. Still delivered reliably over WebSocket.
    Unreliable,
}

// ---------------------------------------------------------------------------
// Session state as seen by clients
// ---------------------------------------------------------------------------

/// Lifecycle state of a battle, as recorded in durable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, waiting for the battle to begin.
    Waiting,
    /// Battle is running.
    InProgress,
    /// Battle is over; the session may still be inspected.
    Finished,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Finished => write!(f, "finished"),
        }
    }
}

/// One rostered player's live combat attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStateView {
    pub player_id: PlayerId,
    /// Ruleset role tag, e.g. `"attacker"` or `"defender"`.
    pub role: String,
    pub hp: i32,
    pub mp: i32,
    /// Ruleset stance tag, e.g. `"guard"`.
    pub stance: String,
    pub last_position_id: Option<PositionId>,
}

/// Read-only view of a battle session. Never carries connection handles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    pub session_id: SessionId,
    /// Ruleset tag of the battle.
    pub mode: String,
    pub status: SessionStatus,
    /// The roster, in roster order.
    pub players: Vec<PlayerStateView>,
    /// Players with a live connection at the time the view was taken.
    pub connected: Vec<PlayerId>,
}

// ---------------------------------------------------------------------------
// SystemMessage — framework-level messages
// ---------------------------------------------------------------------------

/// Messages the server itself produces or consumes (not battle messages).
///
/// Internally tagged: `{ "type": "Handshake", "version": 1, ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SystemMessage {
    // -- Connection lifecycle --

    /// Client → Server, first frame: "attach me to this battle".
    ///
    /// `session_id` is kept as the raw string so the server can answer a
    /// malformed one with a precise error instead of a decode failure.
    /// `token` is the credential the authenticator turns into a player id.
    Handshake {
        version: u32,
        session_id: String,
        token: Option<String>,
    },

    /// Server → Client: attached. Seeds the client with the session view
    /// and its own player's state.
    HandshakeAck {
        session: SessionView,
        player: PlayerStateView,
        server_time: u64,
    },

    /// Either direction: "I'm disconnecting."
    Disconnect { reason: String },

    // -- Heartbeat (keep-alive) --

    /// Client → Server: "I'm still here."
    Heartbeat { client_time: u64 },

    /// Server → Client: echo of the client time plus server time.
    HeartbeatAck { client_time: u64, server_time: u64 },

    // -- Errors --

    /// Server → Client: "Something went wrong." HTTP-style codes.
    Error { code: u16, message: String },
}

// ---------------------------------------------------------------------------
// Payload / Envelope
// ---------------------------------------------------------------------------

/// The content of a message: either a system message or battle data.
///
/// Adjacently tagged: `{ "type": "Game", "data": [1, 2, 3] }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Payload {
    /// A framework-level message.
    System(SystemMessage),

    /// Battle data, opaque to the server core.
    Game(Vec<u8>),
}

/// The top-level message wrapper. Every frame on the wire is an Envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Per-side sequence number.
    pub seq: u64,

    /// Milliseconds since the sender's epoch (server: connection start).
    pub timestamp: u64,

    /// Defaults to `ReliableOrdered` when absent.
    #[serde(default)]
    pub channel: Channel,

    pub payload: Payload,
}

impl Envelope {
    /// Wraps a system message in a reliable envelope.
    pub fn system(seq: u64, timestamp: u64, msg: SystemMessage) -> Self {
        Self {
            seq,
            timestamp,
            channel: Channel::ReliableOrdered,
            payload: Payload::System(msg),
        }
    }
}
