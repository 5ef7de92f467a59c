//! Transport abstraction layer for geobattle.
//!
//! Provides the [`Transport`], [`PendingConnection`] and [`Connection`]
//! traits. The session layer treats a connection as an opaque handle that
//! can send bytes, receive bytes and be closed; nothing above this crate
//! knows it is a WebSocket.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{PendingUpgrade, WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;

/// Opaque identifier for a connection.
///
/// Two handles are "the same connection" exactly when their ids are equal.
/// The session layer relies on this to ignore stale detaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
///
/// Accepting is split in two steps. [`accept_pending`](Self::accept_pending)
/// only takes the raw stream off the listener, and
/// [`PendingConnection::upgrade`] completes the protocol handshake. A server
/// runs the upgrade in the connection's own task so one slow peer never
/// stalls the accept loop.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// An accepted stream that has not finished its handshake yet.
    type Pending: PendingConnection<Connection = Self::Connection, Error = Self::Error>;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for the next incoming stream without upgrading it.
    fn accept_pending(
        &mut self,
    ) -> impl Future<Output = Result<Self::Pending, Self::Error>> + Send;

    /// Waits for and fully accepts the next incoming connection.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        async move { self.accept_pending().await?.upgrade().await }
    }

    /// Returns the address the transport is listening on.
    fn local_addr(&self) -> Result<SocketAddr, Self::Error>;
}

/// An accepted stream waiting for its handshake to complete.
pub trait PendingConnection: Send + 'static {
    /// The connection this becomes once upgraded.
    type Connection: Connection;
    type Error: std::error::Error + Send + Sync;

    /// The remote address of the peer.
    fn peer_addr(&self) -> SocketAddr;

    /// Completes the handshake. Callers bound how long they wait.
    fn upgrade(self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;
}

/// A single connection that can send and receive bytes.
///
/// The returned futures are `Send` so generic code holding a
/// `C: Connection` can still be spawned onto the runtime.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Sends data to the remote peer.
    fn send(
        &self,
        data: &[u8],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receives the next message from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send;

    /// Closes the connection. Closing an already closed connection is
    /// not an error.
    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}
