//! Integration tests for the geobattle server, handler, and full connection flow.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use geobattle::prelude::*;
use geobattle_protocol::Channel;
use geobattle_store::{CombatSnapshot, StoreError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

// =========================================================================
// Authenticator and fixtures
// =========================================================================

/// Accepts a player id as the token.
struct TokenAuth;

impl Authenticator for TokenAuth {
    async fn authenticate(&self, token: &str) -> Result<PlayerId, AuthError> {
        token.parse().map_err(|_| AuthError("token is not a player id".into()))
    }
}

struct Duel {
    session_id: SessionId,
    attacker: PlayerId,
    defender: PlayerId,
    store: Arc<MemoryStore>,
}

fn duel() -> Duel {
    let session_id = SessionId::new_v4();
    let attacker = PlayerId::new_v4();
    let defender = PlayerId::new_v4();
    let record = SessionRecord::new("duel", SessionStatus::InProgress)
        .with_player(attacker, "attacker")
        .with_player(defender, "defender")
        .with_snapshot(
            defender,
            CombatSnapshot {
                hp: 40,
                mp: 10,
                stance: "guard".into(),
                last_position_id: None,
            },
        );
    Duel {
        session_id,
        attacker,
        defender,
        store: Arc::new(MemoryStore::new().with_session(session_id, record)),
    }
}

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct TestServer {
    addr: String,
    registry: SessionRegistry<MemoryStore, WebSocketConnection>,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<(), GeobattleError>>,
}

/// Starts a server on a random port.
async fn start_server(store: Arc<MemoryStore>, builder: GeobattleServerBuilder) -> TestServer {
    let server = builder
        .bind("127.0.0.1:0")
        .build(store, TokenAuth)
        .await
        .expect("server should build");

    let addr = server.local_addr().expect("should have local addr").to_string();
    let registry = server.registry();
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(server.run_until(shutdown.clone()));

    TestServer {
        addr,
        registry,
        shutdown,
        handle,
    }
}

async fn start_default(store: Arc<MemoryStore>) -> TestServer {
    start_server(store, GeobattleServerBuilder::new()).await
}

async fn connect(addr: &str) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("should connect");
    ws
}

fn encode_envelope(envelope: &Envelope) -> Message {
    let bytes = serde_json::to_vec(envelope).expect("encode");
    Message::Binary(bytes.into())
}

fn decode_envelope(msg: Message) -> Envelope {
    serde_json::from_slice(&msg.into_data()).expect("decode")
}

async fn send_system(ws: &mut ClientWs, seq: u64, msg: SystemMessage) {
    let env = Envelope::system(seq, 0, msg);
    ws.send(encode_envelope(&env)).await.expect("send");
}

/// Receives the next data frame from the server.
async fn recv_envelope(ws: &mut ClientWs) -> Envelope {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("server should answer")
            .expect("stream should be open")
            .expect("frame should be valid");
        if msg.is_binary() || msg.is_text() {
            return decode_envelope(msg);
        }
    }
}

/// Sends a handshake and returns the server's first reply.
async fn handshake_raw(ws: &mut ClientWs, session_id: &str, token: &str) -> Envelope {
    send_system(
        ws,
        0,
        SystemMessage::Handshake {
            version: PROTOCOL_VERSION,
            session_id: session_id.to_string(),
            token: Some(token.to_string()),
        },
    )
    .await;
    recv_envelope(ws).await
}

/// Connects, handshakes, and expects a HandshakeAck.
async fn join(addr: &str, session_id: SessionId, player_id: PlayerId) -> (ClientWs, SessionView, PlayerStateView) {
    let mut ws = connect(addr).await;
    let ack = handshake_raw(&mut ws, &session_id.to_string(), &player_id.to_string()).await;
    match ack.payload {
        Payload::System(SystemMessage::HandshakeAck { session, player, .. }) => (ws, session, player),
        other => panic!("expected HandshakeAck, got {other:?}"),
    }
}

fn expect_error(env: Envelope) -> u16 {
    match env.payload {
        Payload::System(SystemMessage::Error { code, .. }) => code,
        other => panic!("expected Error, got {other:?}"),
    }
}

/// Waits until the server closes the WebSocket, skipping data frames.
async fn expect_closed(ws: &mut ClientWs) {
    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "server should close the connection");
}

/// Polls until the session has `expected` live connections.
async fn wait_for_connections(
    registry: &SessionRegistry<MemoryStore, WebSocketConnection>,
    session_id: SessionId,
    expected: usize,
) {
    for _ in 0..200 {
        let count = match registry.get(session_id).await {
            Some(session) => session.connection_count().await,
            None => 0,
        };
        if count == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session never reached {expected} connections");
}

// =========================================================================
// Handshake and attach
// =========================================================================

#[tokio::test]
async fn test_handshake_rostered_player_receives_session_view() {
    let d = duel();
    let server = start_default(Arc::clone(&d.store)).await;

    let (_ws, session, player) = join(&server.addr, d.session_id, d.attacker).await;

    assert_eq!(session.session_id, d.session_id);
    assert_eq!(session.mode, "duel");
    assert_eq!(session.status, SessionStatus::InProgress);
    assert_eq!(session.players.len(), 2);
    assert_eq!(session.connected, vec![d.attacker]);
    assert_eq!(player.player_id, d.attacker);
    assert_eq!((player.hp, player.mp), (100, 100));
}

#[tokio::test]
async fn test_handshake_restores_snapshot_values() {
    let d = duel();
    let server = start_default(Arc::clone(&d.store)).await;

    let (_ws, _, player) = join(&server.addr, d.session_id, d.defender).await;

    assert_eq!((player.hp, player.mp), (40, 10));
    assert_eq!(player.stance, "guard");
}

#[tokio::test]
async fn test_handshake_unknown_session_returns_404_and_closes() {
    let d = duel();
    let server = start_default(Arc::clone(&d.store)).await;
    let mut ws = connect(&server.addr).await;

    let reply = handshake_raw(&mut ws, &SessionId::new_v4().to_string(), &d.attacker.to_string()).await;

    assert_eq!(expect_error(reply), 404);
    expect_closed(&mut ws).await;
    assert_eq!(server.registry.resident_count().await, 0);
}

#[tokio::test]
async fn test_handshake_player_not_in_roster_returns_403() {
    let d = duel();
    let server = start_default(Arc::clone(&d.store)).await;
    let mut ws = connect(&server.addr).await;

    let reply = handshake_raw(&mut ws, &d.session_id.to_string(), &PlayerId::new_v4().to_string()).await;

    assert_eq!(expect_error(reply), 403);
    expect_closed(&mut ws).await;
    wait_for_connections(&server.registry, d.session_id, 0).await;
}

#[tokio::test]
async fn test_handshake_malformed_session_id_returns_400() {
    let d = duel();
    let server = start_default(Arc::clone(&d.store)).await;
    let mut ws = connect(&server.addr).await;

    let reply = handshake_raw(&mut ws, "not-a-session", &d.attacker.to_string()).await;

    assert_eq!(expect_error(reply), 400);
    assert_eq!(d.store.calls().session_metadata, 0);
}

#[tokio::test]
async fn test_handshake_bad_token_returns_401() {
    let d = duel();
    let server = start_default(Arc::clone(&d.store)).await;
    let mut ws = connect(&server.addr).await;

    let reply = handshake_raw(&mut ws, &d.session_id.to_string(), "letmein").await;

    assert_eq!(expect_error(reply), 401);
}

#[tokio::test]
async fn test_handshake_version_mismatch_returns_400() {
    let d = duel();
    let server = start_default(Arc::clone(&d.store)).await;
    let mut ws = connect(&server.addr).await;

    send_system(
        &mut ws,
        0,
        SystemMessage::Handshake {
            version: 999,
            session_id: d.session_id.to_string(),
            token: Some(d.attacker.to_string()),
        },
    )
    .await;

    assert_eq!(expect_error(recv_envelope(&mut ws).await), 400);
}

#[tokio::test]
async fn test_handshake_storage_failure_returns_503_then_retry_succeeds() {
    let d = duel();
    d.store.fail_next(1);
    let server = start_default(Arc::clone(&d.store)).await;
    let mut ws = connect(&server.addr).await;

    let reply = handshake_raw(&mut ws, &d.session_id.to_string(), &d.attacker.to_string()).await;
    assert_eq!(expect_error(reply), 503);

    let (_ws, session, _) = join(&server.addr, d.session_id, d.attacker).await;
    assert_eq!(session.connected, vec![d.attacker]);
}

#[tokio::test]
async fn test_handshake_timeout_closes_silent_client() {
    let d = duel();
    let server = start_server(
        Arc::clone(&d.store),
        GeobattleServerBuilder::new().handshake_timeout(Duration::from_millis(100)),
    )
    .await;
    let mut ws = connect(&server.addr).await;

    expect_closed(&mut ws).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_cold_attach_hydrates_once() {
    let d = duel();
    d.store.set_latency(Duration::from_millis(50));
    let server = start_default(Arc::clone(&d.store)).await;

    let ((_wa, _, _), (_wb, _, _)) = tokio::join!(
        join(&server.addr, d.session_id, d.attacker),
        join(&server.addr, d.session_id, d.defender),
    );

    assert_eq!(d.store.calls().list_roster, 1);
    wait_for_connections(&server.registry, d.session_id, 2).await;
}

// =========================================================================
// Reading
// =========================================================================

#[tokio::test]
async fn test_heartbeat_answered_with_ack() {
    let d = duel();
    let server = start_default(Arc::clone(&d.store)).await;
    let (mut ws, _, _) = join(&server.addr, d.session_id, d.attacker).await;

    send_system(&mut ws, 1, SystemMessage::Heartbeat { client_time: 12345 }).await;

    match recv_envelope(&mut ws).await.payload {
        Payload::System(SystemMessage::HeartbeatAck { client_time, .. }) => {
            assert_eq!(client_time, 12345);
        }
        other => panic!("expected HeartbeatAck, got {other:?}"),
    }
}

#[tokio::test]
async fn test_game_payload_reaches_battle_inbox() {
    let d = duel();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let server = start_server(Arc::clone(&d.store), GeobattleServerBuilder::new().battle_inbox(tx)).await;
    let (mut ws, _, _) = join(&server.addr, d.session_id, d.attacker).await;

    let env = Envelope {
        seq: 7,
        timestamp: 0,
        channel: Channel::Unreliable,
        payload: Payload::Game(b"move:north".to_vec()),
    };
    ws.send(encode_envelope(&env)).await.expect("send");

    let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("frame should arrive")
        .expect("inbox open");
    assert_eq!(frame.session_id, d.session_id);
    assert_eq!(frame.player_id, d.attacker);
    assert_eq!(frame.seq, 7);
    assert_eq!(frame.channel, Channel::Unreliable);
    assert_eq!(frame.data, b"move:north");
}

#[tokio::test]
async fn test_garbage_frame_is_skipped() {
    let d = duel();
    let server = start_default(Arc::clone(&d.store)).await;
    let (mut ws, _, _) = join(&server.addr, d.session_id, d.attacker).await;

    ws.send(Message::Binary(b"{not json".to_vec().into())).await.expect("send");
    send_system(&mut ws, 2, SystemMessage::Heartbeat { client_time: 1 }).await;

    assert!(matches!(
        recv_envelope(&mut ws).await.payload,
        Payload::System(SystemMessage::HeartbeatAck { .. })
    ));
}

#[tokio::test]
async fn test_read_idle_timeout_detaches_player() {
    let d = duel();
    let server = start_server(
        Arc::clone(&d.store),
        GeobattleServerBuilder::new().read_idle_timeout(Duration::from_millis(150)),
    )
    .await;
    let (mut ws, _, _) = join(&server.addr, d.session_id, d.attacker).await;

    expect_closed(&mut ws).await;
    wait_for_connections(&server.registry, d.session_id, 0).await;
}

// =========================================================================
// Detach
// =========================================================================

#[tokio::test]
async fn test_disconnect_message_detaches_player_keeps_roster() {
    let d = duel();
    let server = start_default(Arc::clone(&d.store)).await;
    let (mut ws, _, _) = join(&server.addr, d.session_id, d.attacker).await;
    wait_for_connections(&server.registry, d.session_id, 1).await;

    send_system(&mut ws, 1, SystemMessage::Disconnect { reason: "bye".into() }).await;

    expect_closed(&mut ws).await;
    wait_for_connections(&server.registry, d.session_id, 0).await;
    let view = server.registry.snapshot(d.session_id).await.expect("still resident");
    assert_eq!(view.players.len(), 2);
}

#[tokio::test]
async fn test_client_close_detaches_player() {
    let d = duel();
    let server = start_default(Arc::clone(&d.store)).await;
    let (mut ws, _, _) = join(&server.addr, d.session_id, d.attacker).await;
    wait_for_connections(&server.registry, d.session_id, 1).await;

    ws.close(None).await.expect("close");

    wait_for_connections(&server.registry, d.session_id, 0).await;
}

#[tokio::test]
async fn test_reconnect_supersedes_previous_connection() {
    let d = duel();
    let server = start_default(Arc::clone(&d.store)).await;
    let (mut first, _, _) = join(&server.addr, d.session_id, d.attacker).await;

    let (mut second, view, _) = join(&server.addr, d.session_id, d.attacker).await;

    assert_eq!(view.connected, vec![d.attacker]);
    expect_closed(&mut first).await;
    wait_for_connections(&server.registry, d.session_id, 1).await;

    // The newer connection keeps working after the old loop has exited.
    send_system(&mut second, 1, SystemMessage::Heartbeat { client_time: 9 }).await;
    assert!(matches!(
        recv_envelope(&mut second).await.payload,
        Payload::System(SystemMessage::HeartbeatAck { client_time: 9, .. })
    ));
    wait_for_connections(&server.registry, d.session_id, 1).await;
}

#[tokio::test]
async fn test_reject_policy_refuses_second_connection_with_409() {
    let d = duel();
    let server = start_server(
        Arc::clone(&d.store),
        GeobattleServerBuilder::new().reconnect_policy(ReconnectPolicy::Reject),
    )
    .await;
    let (mut first, _, _) = join(&server.addr, d.session_id, d.attacker).await;
    let mut second = connect(&server.addr).await;

    let reply = handshake_raw(&mut second, &d.session_id.to_string(), &d.attacker.to_string()).await;

    assert_eq!(expect_error(reply), 409);
    send_system(&mut first, 1, SystemMessage::Heartbeat { client_time: 3 }).await;
    assert!(matches!(
        recv_envelope(&mut first).await.payload,
        Payload::System(SystemMessage::HeartbeatAck { .. })
    ));
}

#[tokio::test]
async fn test_evict_closes_clients_and_rejoin_rehydrates() {
    let d = duel();
    let server = start_default(Arc::clone(&d.store)).await;
    let (mut wa, _, _) = join(&server.addr, d.session_id, d.attacker).await;
    let (mut wb, _, _) = join(&server.addr, d.session_id, d.defender).await;

    assert!(server.registry.evict(d.session_id).await);

    expect_closed(&mut wa).await;
    expect_closed(&mut wb).await;
    assert_eq!(server.registry.resident_count().await, 0);

    let (_ws, view, _) = join(&server.addr, d.session_id, d.attacker).await;
    assert_eq!(view.connected, vec![d.attacker]);
    assert_eq!(d.store.calls().list_roster, 2);
}

#[tokio::test]
async fn test_idle_sessions_evicted_by_sweeper() {
    let d = duel();
    let server = start_server(
        Arc::clone(&d.store),
        GeobattleServerBuilder::new().idle_evict_after(Duration::from_millis(200)),
    )
    .await;
    let (mut ws, _, _) = join(&server.addr, d.session_id, d.attacker).await;
    send_system(&mut ws, 1, SystemMessage::Disconnect { reason: "done".into() }).await;
    expect_closed(&mut ws).await;

    let mut evicted = false;
    for _ in 0..100 {
        if server.registry.resident_count().await == 0 {
            evicted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(evicted, "idle session should be evicted");
}

// =========================================================================
// Shutdown
// =========================================================================

#[tokio::test]
async fn test_shutdown_detaches_every_connection() {
    let d = duel();
    let server = start_default(Arc::clone(&d.store)).await;
    let (mut wa, _, _) = join(&server.addr, d.session_id, d.attacker).await;
    let (mut wb, _, _) = join(&server.addr, d.session_id, d.defender).await;
    wait_for_connections(&server.registry, d.session_id, 2).await;

    server.shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(2), server.handle)
        .await
        .expect("server should stop")
        .expect("server task should not panic");
    assert!(result.is_ok());

    for ws in [&mut wa, &mut wb] {
        match recv_envelope(ws).await.payload {
            Payload::System(SystemMessage::Disconnect { .. }) => {}
            other => panic!("expected Disconnect, got {other:?}"),
        }
        expect_closed(ws).await;
    }
    let session = server.registry.get(d.session_id).await.expect("still resident");
    assert_eq!(session.connection_count().await, 0);
}

#[tokio::test]
async fn test_shutdown_with_unupgraded_tcp_client_returns() {
    let d = duel();
    let server = start_default(Arc::clone(&d.store)).await;
    let _raw = tokio::net::TcpStream::connect(&server.addr)
        .await
        .expect("tcp connect");
    // Let the accept loop pick the socket up before stopping.
    tokio::time::sleep(Duration::from_millis(50)).await;

    server.shutdown.cancel();

    let result = tokio::time::timeout(Duration::from_secs(2), server.handle).await;
    assert!(matches!(result, Ok(Ok(Ok(())))));
}

#[tokio::test]
async fn test_unupgraded_tcp_client_dropped_after_handshake_timeout() {
    use tokio::io::AsyncReadExt;

    let d = duel();
    let server = start_server(
        Arc::clone(&d.store),
        GeobattleServerBuilder::new().handshake_timeout(Duration::from_millis(100)),
    )
    .await;
    let mut raw = tokio::net::TcpStream::connect(&server.addr)
        .await
        .expect("tcp connect");

    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_secs(2), raw.read(&mut buf)).await;

    // EOF or reset: either way the server let go of the socket.
    assert!(matches!(read, Ok(Ok(0)) | Ok(Err(_))));
}

#[tokio::test]
async fn test_shutdown_with_no_connections_returns() {
    let d = duel();
    let server = start_default(Arc::clone(&d.store)).await;

    server.shutdown.cancel();

    let result = tokio::time::timeout(Duration::from_secs(2), server.handle).await;
    assert!(matches!(result, Ok(Ok(Ok(())))));
}

// =========================================================================
// Durable store
// =========================================================================

#[tokio::test]
async fn test_json_dir_store_serves_sessions_end_to_end() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(JsonDirStore::open(dir.path()).await.expect("open store"));
    let session_id = SessionId::new_v4();
    let player = PlayerId::new_v4();
    store
        .put_session(
            session_id,
            &SessionRecord::new("duel", SessionStatus::Waiting).with_player(player, "attacker"),
        )
        .await
        .expect("write session");

    let server = GeobattleServerBuilder::new()
        .bind("127.0.0.1:0")
        .build(store, TokenAuth)
        .await
        .expect("server should build");
    let addr = server.local_addr().expect("local addr").to_string();
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(server.run_until(shutdown.clone()));

    let (_ws, view, state) = join(&addr, session_id, player).await;
    assert_eq!(view.status, SessionStatus::Waiting);
    assert_eq!(state.role, "attacker");

    shutdown.cancel();
    handle.await.expect("join").expect("clean stop");
}

#[test]
fn test_store_error_converts_into_geobattle_error() {
    let err: GeobattleError = StoreError::Unavailable("db down".into()).into();
    assert!(matches!(err, GeobattleError::Store(_)));
}
