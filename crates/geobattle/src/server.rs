//! `GeobattleServer` builder and server loop.
//!
//! This is the entry point for running a battle server. It ties together
//! all the layers: transport → protocol → session registry → multiplexer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use geobattle_protocol::{Channel, Codec, JsonCodec, PlayerId, SessionId};
use geobattle_session::{Authenticator, ReconnectPolicy, RegistryConfig, SessionRegistry};
use geobattle_store::BattleStore;
use geobattle_transport::{
    Connection, PendingConnection, Transport, WebSocketConnection, WebSocketTransport,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::handler::handle_connection;
use crate::{ConnectionMultiplexer, GeobattleError, ServerConfig};

/// A battle payload received from a player, forwarded to battle logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BattleFrame {
    pub session_id: SessionId,
    pub player_id: PlayerId,
    /// The client's sequence number of the envelope.
    pub seq: u64,
    pub channel: Channel,
    pub data: Vec<u8>,
}

/// Shared server state passed to each connection handler task.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks.
pub(crate) struct ServerState<S, A, K, C> {
    pub(crate) multiplexer: ConnectionMultiplexer<S, C>,
    pub(crate) auth: A,
    pub(crate) codec: K,
    pub(crate) handshake_timeout: Duration,
    pub(crate) read_idle_timeout: Duration,
    pub(crate) inbox: Option<mpsc::UnboundedSender<BattleFrame>>,
    /// Cancelled when the server stops; every read loop watches it.
    pub(crate) shutdown: CancellationToken,
    started: Instant,
}

impl<S, A, K, C> ServerState<S, A, K, C> {
    /// Milliseconds since the server started.
    pub(crate) fn server_time(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for configuring and starting a geobattle server.
///
/// # Example
///
/// ```rust,ignore
/// use geobattle::prelude::*;
///
/// let server = GeobattleServer::builder()
///     .bind("0.0.0.0:8080")
///     .reconnect_policy(ReconnectPolicy::Supersede)
///     .build(store, my_auth)
///     .await?;
/// server.run().await
/// ```
pub struct GeobattleServerBuilder {
    bind_addr: String,
    registry: RegistryConfig,
    handshake_timeout: Duration,
    read_idle_timeout: Duration,
    idle_evict_after: Option<Duration>,
    inbox: Option<mpsc::UnboundedSender<BattleFrame>>,
}

impl GeobattleServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::from_config(&ServerConfig {
            bind_addr: "127.0.0.1:8080".to_string(),
            ..ServerConfig::default()
        })
    }

    /// Creates a builder from a loaded [`ServerConfig`].
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            bind_addr: config.bind_addr.clone(),
            registry: config.registry.clone(),
            handshake_timeout: config.handshake_timeout,
            read_idle_timeout: config.read_idle_timeout,
            idle_evict_after: config.idle_evict_after,
            inbox: None,
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the session registry configuration.
    pub fn registry_config(mut self, config: RegistryConfig) -> Self {
        self.registry = config;
        self
    }

    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.registry.reconnect_policy = policy;
        self
    }

    pub fn max_resident_sessions(mut self, max: usize) -> Self {
        self.registry.max_resident_sessions = max;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn read_idle_timeout(mut self, timeout: Duration) -> Self {
        self.read_idle_timeout = timeout;
        self
    }

    /// Periodically evicts sessions without connections for `grace`.
    pub fn idle_evict_after(mut self, grace: Duration) -> Self {
        self.idle_evict_after = Some(grace);
        self
    }

    /// Forwards every battle payload to `inbox`. Without an inbox, battle
    /// payloads are dropped.
    pub fn battle_inbox(mut self, inbox: mpsc::UnboundedSender<BattleFrame>) -> Self {
        self.inbox = Some(inbox);
        self
    }

    /// Binds the listener and assembles the server.
    ///
    /// Uses `JsonCodec` and `WebSocketTransport`.
    pub async fn build<S, A>(
        self,
        store: Arc<S>,
        auth: A,
    ) -> Result<GeobattleServer<S, A>, GeobattleError>
    where
        S: BattleStore,
        A: Authenticator,
    {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;
        let registry = SessionRegistry::new(store, self.registry);

        let state = Arc::new(ServerState {
            multiplexer: ConnectionMultiplexer::new(registry),
            auth,
            codec: JsonCodec,
            handshake_timeout: self.handshake_timeout,
            read_idle_timeout: self.read_idle_timeout,
            inbox: self.inbox,
            shutdown: CancellationToken::new(),
            started: Instant::now(),
        });

        Ok(GeobattleServer {
            transport,
            state,
            idle_evict_after: self.idle_evict_after,
        })
    }
}

impl Default for GeobattleServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// A bound geobattle server.
///
/// Call [`run()`](Self::run) or [`run_until()`](Self::run_until) to start
/// accepting connections.
pub struct GeobattleServer<S, A, K = JsonCodec> {
    transport: WebSocketTransport,
    state: Arc<ServerState<S, A, K, WebSocketConnection>>,
    idle_evict_after: Option<Duration>,
}

impl GeobattleServer<(), ()> {
    /// Creates a new builder.
    pub fn builder() -> GeobattleServerBuilder {
        GeobattleServerBuilder::new()
    }
}

impl<S, A, K> GeobattleServer<S, A, K>
where
    S: BattleStore,
    A: Authenticator,
    K: Codec,
{
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, GeobattleError> {
        Ok(self.transport.local_addr()?)
    }

    /// A handle to the server's session registry.
    pub fn registry(&self) -> SessionRegistry<S, WebSocketConnection> {
        self.state.multiplexer.registry().clone()
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), GeobattleError> {
        self.run_until(CancellationToken::new()).await
    }

    /// Runs the accept loop until `shutdown` is cancelled.
    ///
    /// Each accepted connection gets its own task, which completes the
    /// WebSocket upgrade and runs the connection handler. On cancellation
    /// the server stops accepting, signals every connection to detach, and
    /// returns once all connection tasks have reached `Detached`.
    pub async fn run_until(mut self, shutdown: CancellationToken) -> Result<(), GeobattleError> {
        let addr = self.local_addr()?;
        tracing::info!(%addr, "geobattle server running");

        let tracker = TaskTracker::new();

        if let Some(grace) = self.idle_evict_after {
            let registry = self.registry();
            let stop = self.state.shutdown.clone();
            tracker.spawn(sweep_idle_sessions(registry, grace, stop));
        }

        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = self.transport.accept_pending() => accepted,
            };

            match accepted {
                Ok(pending) => {
                    let state = Arc::clone(&self.state);
                    tracker.spawn(async move {
                        let peer = pending.peer_addr();
                        // A peer that never completes the upgrade must not
                        // outlive the handshake window or hold up shutdown.
                        let upgraded = tokio::select! {
                            _ = state.shutdown.cancelled() => {
                                tracing::debug!(%peer, "shutdown before websocket upgrade");
                                return;
                            }
                            upgraded = tokio::time::timeout(state.handshake_timeout, pending.upgrade()) => upgraded,
                        };
                        let conn = match upgraded {
                            Ok(Ok(conn)) => Arc::new(conn),
                            Ok(Err(e)) => {
                                tracing::debug!(%peer, error = %e, "websocket upgrade failed");
                                return;
                            }
                            Err(_) => {
                                tracing::debug!(%peer, "websocket upgrade timed out");
                                return;
                            }
                        };
                        let conn_id = conn.id();
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(%conn_id, error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }

        tracing::info!(connections = tracker.len(), "shutting down, detaching connections");
        self.state.shutdown.cancel();
        tracker.close();
        tracker.wait().await;
        tracing::info!("geobattle server stopped");
        Ok(())
    }
}

/// Evicts sessions idle for longer than `grace` until `stop` fires.
async fn sweep_idle_sessions<S, C>(
    registry: SessionRegistry<S, C>,
    grace: Duration,
    stop: CancellationToken,
) where
    S: BattleStore,
    C: Connection,
{
    let period = (grace / 2).max(Duration::from_millis(100));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = interval.tick() => {
                let evicted = registry.evict_idle(grace).await;
                if !evicted.is_empty() {
                    tracing::debug!(count = evicted.len(), "idle sweep evicted sessions");
                }
            }
        }
    }
}
