//! Integration tests for the WebSocket transport.
//!
//! These spin up a real WebSocket server and client to verify that data
//! actually flows over the network and that close/recv interact correctly.

#[cfg(feature = "websocket")]
mod websocket {
    use std::sync::Arc;
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use geobattle_transport::{Connection, PendingConnection, Transport, WebSocketTransport};
    use tokio_tungstenite::tungstenite::Message;

    type ClientWs = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn connect_client(addr: &str) -> ClientWs {
        let url = format!("ws://{addr}");
        let (ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .expect("client should connect");
        ws
    }

    /// Binds on an OS-assigned port and returns the transport and its address.
    async fn bind_any() -> (WebSocketTransport, String) {
        let transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("local addr").to_string();
        (transport, addr)
    }

    #[tokio::test]
    async fn test_websocket_accept_and_send_receive() {
        let (mut transport, addr) = bind_any().await;

        let server_handle = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });
        let mut client_ws = connect_client(&addr).await;
        let server_conn = server_handle.await.expect("task should complete");

        assert!(server_conn.id().into_inner() > 0);

        server_conn
            .send(b"hello from server")
            .await
            .expect("send should succeed");
        let msg = client_ws.next().await.unwrap().unwrap();
        assert_eq!(msg.into_data().as_ref(), b"hello from server");

        client_ws
            .send(Message::Binary(b"hello from client".to_vec().into()))
            .await
            .unwrap();
        let received = server_conn
            .recv()
            .await
            .expect("recv should succeed")
            .expect("should have data");
        assert_eq!(received, b"hello from client");

        server_conn.close().await.expect("close should succeed");
    }

    #[tokio::test]
    async fn test_websocket_recv_returns_none_on_client_close() {
        let (mut transport, addr) = bind_any().await;

        let server_handle = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });
        let mut client_ws = connect_client(&addr).await;
        let server_conn = server_handle.await.unwrap();

        client_ws.send(Message::Close(None)).await.unwrap();

        let result = server_conn.recv().await.expect("recv should not error");
        assert!(result.is_none(), "should return None on client close");
    }

    #[tokio::test]
    async fn test_websocket_close_while_recv_pending_reaches_client() {
        // A read loop parked in recv() must not prevent another task from
        // closing the same connection.
        let (mut transport, addr) = bind_any().await;

        let server_handle = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });
        let mut client_ws = connect_client(&addr).await;
        let server_conn = Arc::new(server_handle.await.unwrap());

        let reader = Arc::clone(&server_conn);
        let read_task = tokio::spawn(async move { reader.recv().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(Duration::from_secs(2), server_conn.close())
            .await
            .expect("close must not wait for the pending recv")
            .expect("close should succeed");

        let frame = client_ws.next().await.expect("client sees a frame");
        assert!(matches!(frame, Ok(Message::Close(_))));

        read_task.abort();
    }

    #[tokio::test]
    async fn test_websocket_close_twice_is_ok_and_send_after_close_fails() {
        let (mut transport, addr) = bind_any().await;

        let server_handle = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });
        let _client_ws = connect_client(&addr).await;
        let server_conn = server_handle.await.unwrap();

        server_conn.close().await.expect("first close");
        server_conn.close().await.expect("second close is a no-op");
        assert!(server_conn.is_closed());
        assert!(server_conn.send(b"late").await.is_err());
    }

    #[tokio::test]
    async fn test_websocket_accept_pending_returns_before_handshake() {
        let (mut transport, addr) = bind_any().await;
        let raw = tokio::net::TcpStream::connect(&addr).await.expect("tcp connect");

        let pending = tokio::time::timeout(Duration::from_secs(2), transport.accept_pending())
            .await
            .expect("accept must not wait for the upgrade")
            .expect("should accept");

        assert_eq!(pending.peer_addr(), raw.local_addr().unwrap());
        // The peer never sends the HTTP upgrade, so the handshake stays open
        // until the caller gives up on it.
        let upgrade = tokio::time::timeout(Duration::from_millis(100), pending.upgrade()).await;
        assert!(upgrade.is_err());
    }

    #[tokio::test]
    async fn test_websocket_accept_pending_then_upgrade_yields_connection() {
        let (mut transport, addr) = bind_any().await;

        let server_handle = tokio::spawn(async move {
            let pending = transport.accept_pending().await.expect("should accept");
            pending.upgrade().await.expect("should upgrade")
        });
        let mut client_ws = connect_client(&addr).await;
        let server_conn = server_handle.await.unwrap();

        server_conn.send(b"ready").await.expect("send");
        let msg = client_ws.next().await.unwrap().unwrap();
        assert_eq!(msg.into_data().as_ref(), b"ready");
    }
}
