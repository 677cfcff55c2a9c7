//! WebSocket client transport over `tokio-tungstenite`.
//!
//! Connects to the relay's WebSocket endpoint (`ws://host:port/ws` by
//! default). `wss://` needs one of tokio-tungstenite's TLS features enabled
//! in the final binary.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), watch_party_relay::RelayError> {
//! use watch_party_relay::{Transport, WebSocketTransport};
//!
//! let mut transport = WebSocketTransport::connect("ws://localhost:3000/ws").await?;
//! transport
//!     .send(r#"{"event":"join-room","data":"movie-night"}"#.to_string())
//!     .await?;
//!
//! if let Some(Ok(frame)) = transport.recv().await {
//!     println!("relay said: {frame}");
//! }
//!
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::{protocol::Message, Error as WsError};

use crate::error::RelayError;
use crate::transport::Transport;

/// The underlying WebSocket stream, exposed for [`WebSocketTransport::from_stream`].
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] backed by a WebSocket connection.
///
/// One relay message maps to one text frame. Binary frames are skipped,
/// pings are answered by tungstenite, and a close frame ends the stream.
///
/// [`recv`](Transport::recv) is cancel-safe: dropping its future before it
/// completes does not lose a frame.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Open a WebSocket connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Io`] if the URL is invalid or the connection
    /// cannot be established. I/O error kinds are preserved; other handshake
    /// failures map to [`ErrorKind::Other`](std::io::ErrorKind::Other).
    pub async fn connect(url: &str) -> Result<Self, RelayError> {
        tracing::debug!(url = %url, "connecting to relay");

        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(handshake_error)?;

        tracing::info!(url = %url, "connected to relay");

        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-established stream (custom TLS, proxies, headers).
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }

    /// [`connect`](Self::connect), failing with [`RelayError::Timeout`] if the
    /// handshake does not finish within `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Timeout`] if the deadline elapses, or any error
    /// [`connect`](Self::connect) may return.
    pub async fn connect_with_timeout(url: &str, timeout: Duration) -> Result<Self, RelayError> {
        tokio::time::timeout(timeout, Self::connect(url))
            .await
            .map_err(|_| RelayError::Timeout)?
    }
}

/// Map a handshake failure to [`RelayError::Io`], keeping the I/O error kind.
fn handshake_error(e: WsError) -> RelayError {
    let kind = match &e {
        WsError::Io(io) => io.kind(),
        _ => std::io::ErrorKind::Other,
    };
    RelayError::Io(std::io::Error::new(kind, e))
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), RelayError> {
        if self.closed {
            return Err(RelayError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| RelayError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, RelayError>> {
        loop {
            let frame = match self.stream.next().await? {
                Ok(frame) => frame,
                Err(e) => return Some(Err(RelayError::TransportReceive(e.to_string()))),
            };

            match frame {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Close(close) => {
                    tracing::debug!(?close, "relay closed the WebSocket");
                    return None;
                }
                Message::Binary(_) => {
                    tracing::warn!("unexpected binary frame from relay, skipping");
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) -> Result<(), RelayError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| RelayError::TransportSend(e.to_string()))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn transport_can_move_into_client_task() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketTransport>();
    }

    #[tokio::test]
    async fn bad_url_is_an_io_error() {
        let err = WebSocketTransport::connect("not-a-valid-url")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Io(_)));
    }

    #[tokio::test]
    async fn refused_connection_keeps_io_kind() {
        let err = WebSocketTransport::connect("ws://127.0.0.1:1")
            .await
            .unwrap_err();
        let RelayError::Io(io) = err else {
            panic!("expected Io, got {err:?}");
        };
        assert_eq!(io.kind(), std::io::ErrorKind::ConnectionRefused);
    }

    #[tokio::test]
    async fn slow_handshake_times_out() {
        // TEST-NET-1 is never routable.
        let err = WebSocketTransport::connect_with_timeout(
            "ws://192.0.2.1:1",
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RelayError::Timeout));
    }

    /// Accept one WebSocket connection on an ephemeral port and run `peer` on it.
    async fn start_peer<F, Fut>(peer: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            peer(ws).await;
        });

        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn recv_yields_text_frames_in_order() {
        let url = start_peer(|mut ws| async move {
            ws.send(Message::Text(r#"{"event":"room-joined"}"#.into()))
                .await
                .unwrap();
            ws.send(Message::Text(r#"{"event":"user-left"}"#.into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert_eq!(
            transport.recv().await.unwrap().unwrap(),
            r#"{"event":"room-joined"}"#
        );
        assert_eq!(
            transport.recv().await.unwrap().unwrap(),
            r#"{"event":"user-left"}"#
        );
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn binary_frames_are_not_relay_messages() {
        let url = start_peer(|mut ws| async move {
            ws.send(Message::Binary(vec![0xDE, 0xAD].into()))
                .await
                .unwrap();
            ws.send(Message::Text("after".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), "after");
    }

    #[tokio::test]
    async fn send_reaches_peer() {
        let url = start_peer(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport
            .send(r#"{"event":"create-room","data":"r1"}"#.to_string())
            .await
            .unwrap();
        assert_eq!(
            transport.recv().await.unwrap().unwrap(),
            r#"{"event":"create-room","data":"r1"}"#
        );
    }

    #[tokio::test]
    async fn send_after_close_is_rejected_and_close_is_idempotent() {
        let url =
            start_peer(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} }).await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        let err = transport.send("late".to_string()).await.unwrap_err();
        assert!(matches!(err, RelayError::TransportClosed));
    }
}
