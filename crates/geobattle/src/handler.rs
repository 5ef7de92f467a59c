//! Per-connection handler: handshake, attach, read loop, release.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow follows [`ConnectionPhase`]:
//!   1. Connecting: receive Handshake → validate version and session id →
//!      authenticate → attach through the multiplexer
//!   2. Attached: send HandshakeAck with the session view
//!   3. Reading: answer heartbeats, forward battle payloads
//!   4. Detached: release the slot, close the transport if still ours
//!
//! Any failure while Connecting is reported to the client as an `Error`
//! frame and closes the transport; nothing stays registered.

use std::sync::Arc;

use geobattle_protocol::{
    Codec, Envelope, Payload, PlayerId, PlayerStateView, ProtocolError, SessionId, SystemMessage,
    PROTOCOL_VERSION,
};
use geobattle_session::Authenticator;
use geobattle_store::BattleStore;
use geobattle_transport::{Connection, ConnectionId};

use crate::server::{BattleFrame, ServerState};
use crate::{AttachedConnection, ConnectionPhase, DetachReason, GeobattleError};

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<S, A, K, C>(
    conn: Arc<C>,
    state: Arc<ServerState<S, A, K, C>>,
) -> Result<(), GeobattleError>
where
    S: BattleStore,
    A: Authenticator,
    K: Codec,
    C: Connection,
    GeobattleError: From<C::Error>,
{
    let conn_id = conn.id();
    let mut phase = ConnectionPhase::Connecting;
    tracing::debug!(%conn_id, %phase, "handling new connection");

    // --- Connecting ---
    let attached = match connect(&conn, &state).await {
        Ok(attached) => attached,
        Err(e) => {
            advance(&mut phase, ConnectionPhase::Detached, conn_id);
            if let Err(close_err) = conn.close().await {
                tracing::debug!(%conn_id, error = %close_err, "close after failed attach");
            }
            return Err(e);
        }
    };
    advance(&mut phase, ConnectionPhase::Attached, conn_id);

    // --- Attached: seed the client ---
    let ack = Envelope::system(
        0,
        state.server_time(),
        SystemMessage::HandshakeAck {
            session: attached.view.clone(),
            player: PlayerStateView::from(&attached.player),
            server_time: state.server_time(),
        },
    );
    if let Err(e) = send_envelope(&*conn, &state.codec, &ack).await {
        advance(&mut phase, ConnectionPhase::Detached, conn_id);
        state
            .multiplexer
            .release(attached, DetachReason::TransportFailed)
            .await;
        return Err(e);
    }

    // --- Reading ---
    advance(&mut phase, ConnectionPhase::Reading, conn_id);
    let reason = read_loop(&attached, &state).await;

    if reason == DetachReason::Shutdown {
        let bye = Envelope::system(
            0,
            state.server_time(),
            SystemMessage::Disconnect {
                reason: "server shutting down".into(),
            },
        );
        if let Err(e) = send_envelope(&*conn, &state.codec, &bye).await {
            tracing::debug!(%conn_id, error = %e, "could not notify client of shutdown");
        }
    }

    // --- Detached ---
    advance(&mut phase, ConnectionPhase::Detached, conn_id);
    state.multiplexer.release(attached, reason).await;
    Ok(())
}

/// Logs and records a phase transition.
fn advance(phase: &mut ConnectionPhase, target: ConnectionPhase, conn_id: ConnectionId) {
    debug_assert!(
        phase.can_transition_to(target),
        "invalid connection transition {phase} → {target}"
    );
    tracing::debug!(%conn_id, from = %phase, to = %target, "connection phase");
    *phase = target;
}

// ---------------------------------------------------------------------------
// Connecting
// ---------------------------------------------------------------------------

/// Runs the handshake and attaches the connection.
///
/// Every refusal is reported to the client with an `Error` frame carrying
/// [`GeobattleError::status_code`] before the error is returned.
async fn connect<S, A, K, C>(
    conn: &Arc<C>,
    state: &ServerState<S, A, K, C>,
) -> Result<AttachedConnection<C>, GeobattleError>
where
    S: BattleStore,
    A: Authenticator,
    K: Codec,
    C: Connection,
    GeobattleError: From<C::Error>,
{
    let result = match perform_handshake(&**conn, state).await {
        Ok((session_id, player_id)) => {
            tracing::debug!(conn_id = %conn.id(), %session_id, %player_id, "handshake accepted");
            state
                .multiplexer
                .attach_connection(session_id, player_id, Arc::clone(conn))
                .await
                .map_err(HandshakeFailure::Refused)
        }
        Err(failure) => Err(failure),
    };

    match result {
        Ok(attached) => Ok(attached),
        Err(HandshakeFailure::Silent(e)) => Err(e),
        Err(HandshakeFailure::Refused(e)) => {
            let frame = SystemMessage::Error {
                code: e.status_code(),
                message: e.to_string(),
            };
            let envelope = Envelope::system(0, state.server_time(), frame);
            if let Err(send_err) = send_envelope(&**conn, &state.codec, &envelope).await {
                tracing::debug!(conn_id = %conn.id(), error = %send_err, "could not report refusal");
            }
            tracing::debug!(conn_id = %conn.id(), code = e.status_code(), error = %e, "connection refused");
            Err(e)
        }
    }
}

/// How a connection attempt ended without attaching.
enum HandshakeFailure {
    /// Nothing to tell the client: it went away or never spoke.
    Silent(GeobattleError),
    /// The client is told why with an `Error` frame.
    Refused(GeobattleError),
}

/// Receives and validates the Handshake frame.
async fn perform_handshake<S, A, K, C>(
    conn: &C,
    state: &ServerState<S, A, K, C>,
) -> Result<(SessionId, PlayerId), HandshakeFailure>
where
    S: BattleStore,
    A: Authenticator,
    K: Codec,
    C: Connection,
    GeobattleError: From<C::Error>,
{
    let silent = |reason: &str| {
        HandshakeFailure::Silent(ProtocolError::InvalidMessage(reason.to_string()).into())
    };

    let received = tokio::select! {
        _ = state.shutdown.cancelled() => return Err(silent("server shutting down")),
        received = tokio::time::timeout(state.handshake_timeout, conn.recv()) => received,
    };
    let data = match received {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => return Err(silent("connection closed before handshake")),
        Ok(Err(e)) => return Err(HandshakeFailure::Silent(e.into())),
        Err(_) => return Err(silent("handshake timed out")),
    };

    let reported = |e: ProtocolError| HandshakeFailure::Refused(e.into());

    let envelope: Envelope = state.codec.decode(&data).map_err(reported)?;
    let (version, session_id, token) = match envelope.payload {
        Payload::System(SystemMessage::Handshake {
            version,
            session_id,
            token,
        }) => (version, session_id, token),
        _ => {
            return Err(reported(ProtocolError::InvalidMessage(
                "first message must be Handshake".into(),
            )));
        }
    };

    if version != PROTOCOL_VERSION {
        return Err(reported(ProtocolError::InvalidMessage(format!(
            "version mismatch: expected {PROTOCOL_VERSION}, got {version}"
        ))));
    }

    let session_id: SessionId = session_id.parse().map_err(reported)?;

    let token = token.as_deref().unwrap_or("");
    let player_id = state
        .auth
        .authenticate(token)
        .await
        .map_err(|e| HandshakeFailure::Refused(e.into()))?;

    Ok((session_id, player_id))
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Reads until something ends the connection and says what it was.
async fn read_loop<S, A, K, C>(
    attached: &AttachedConnection<C>,
    state: &ServerState<S, A, K, C>,
) -> DetachReason
where
    S: BattleStore,
    K: Codec,
    C: Connection,
    GeobattleError: From<C::Error>,
{
    let conn = &*attached.conn;
    let conn_id = attached.conn_id();
    let session_id = attached.session_id();
    let player_id = attached.player_id();
    let mut seq: u64 = 1;

    loop {
        let received = tokio::select! {
            biased;
            _ = state.shutdown.cancelled() => return DetachReason::Shutdown,
            _ = attached.superseded().cancelled() => return attached.superseded_reason(),
            received = tokio::time::timeout(state.read_idle_timeout, conn.recv()) => received,
        };

        let data = match received {
            Ok(Ok(Some(data))) => data,
            Ok(Ok(None)) => return DetachReason::ClientClosed,
            Ok(Err(e)) => {
                // A recv error after we were replaced is just the old socket
                // being torn down.
                if attached.superseded().is_cancelled() {
                    return attached.superseded_reason();
                }
                tracing::debug!(%conn_id, %player_id, error = %e, "recv error");
                return DetachReason::TransportFailed;
            }
            Err(_) => return DetachReason::IdleTimeout,
        };

        let envelope: Envelope = match state.codec.decode(&data) {
            Ok(env) => env,
            Err(e) => {
                tracing::debug!(%conn_id, %player_id, error = %e, "failed to decode envelope");
                continue;
            }
        };

        match envelope.payload {
            Payload::System(SystemMessage::Heartbeat { client_time }) => {
                let ack = Envelope::system(
                    next_seq(&mut seq),
                    state.server_time(),
                    SystemMessage::HeartbeatAck {
                        client_time,
                        server_time: state.server_time(),
                    },
                );
                if let Err(e) = send_envelope(conn, &state.codec, &ack).await {
                    tracing::debug!(%conn_id, %player_id, error = %e, "heartbeat ack failed");
                    return DetachReason::TransportFailed;
                }
            }
            Payload::System(SystemMessage::Disconnect { reason }) => {
                tracing::debug!(%conn_id, %player_id, %reason, "client disconnected");
                return DetachReason::ClientRequested;
            }
            Payload::System(_) => {
                tracing::debug!(%conn_id, %player_id, "ignoring unexpected system message");
            }
            Payload::Game(data) => {
                let Some(inbox) = &state.inbox else {
                    continue;
                };
                let frame = BattleFrame {
                    session_id,
                    player_id,
                    seq: envelope.seq,
                    channel: envelope.channel,
                    data,
                };
                if inbox.send(frame).is_err() {
                    tracing::debug!(%session_id, "battle inbox closed, dropping frame");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Encodes and sends one envelope.
async fn send_envelope<C>(
    conn: &C,
    codec: &impl Codec,
    envelope: &Envelope,
) -> Result<(), GeobattleError>
where
    C: Connection,
    GeobattleError: From<C::Error>,
{
    let bytes = codec.encode(envelope)?;
    conn.send(&bytes).await?;
    Ok(())
}

/// Increments and returns the next sequence number.
fn next_seq(seq: &mut u64) -> u64 {
    let current = *seq;
    *seq += 1;
    current
}
