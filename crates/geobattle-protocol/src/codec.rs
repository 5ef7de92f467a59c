//! Codec trait and implementations for serializing/deserializing messages.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;
}

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// Mobile clients and browser debugging tools can read every frame as-is.
/// A client's opening frame decodes straight into a `Handshake`:
///
/// ```rust
/// use geobattle_protocol::{
///     Codec, Envelope, JsonCodec, Payload, SystemMessage, PROTOCOL_VERSION,
/// };
///
/// let frame = br#"{
///     "seq": 0,
///     "timestamp": 0,
///     "payload": {
///         "type": "System",
///         "data": {
///             "type": "Handshake",
///             "version": 1,
///             "session_id": "0b5c1f0e-8f0a-4d1e-9a43-2f1d6c7e9b10",
///             "token": "device-token"
///         }
///     }
/// }"#;
///
/// let envelope: Envelope = JsonCodec.decode(frame).unwrap();
/// let Payload::System(SystemMessage::Handshake { version, session_id, .. }) = envelope.payload
/// else {
///     panic!("expected a handshake");
/// };
/// assert_eq!(version, PROTOCOL_VERSION);
/// assert!(session_id.parse::<geobattle_protocol::SessionId>().is_ok());
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
