//! HTTP and WebSocket front end.
//!
//! | Path | Description |
//! |------|-------------|
//! | `/ws` (configurable) | WebSocket endpoint speaking the relay protocol |
//! | everything else | Static files from the configured directory |
//!
//! Each socket gets a writer task that drains the connection's outbound queue
//! while the handler reads inbound frames and hands them to the relay.

use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::{cors::CorsLayer, services::ServeDir};
use tracing::{debug, error, info};

use crate::config::RelayConfig;
use crate::error::Result;
use crate::protocol::{ClientMessage, ConnectionId};
use crate::relay::{Relay, RelayHandle};

/// Build the router for a running relay.
pub fn router(relay: RelayHandle, config: &RelayConfig) -> Router {
    let assets = ServeDir::new(&config.static_dir).append_index_html_on_directories(true);

    Router::new()
        .route(&config.ws_path, get(ws_handler))
        .fallback_service(assets)
        .layer(CorsLayer::permissive())
        .with_state(relay)
}

/// A bound relay server, ready to serve.
pub struct RelayServer {
    listener: TcpListener,
    relay: Relay,
    app: Router,
}

impl RelayServer {
    /// Start the relay actor and bind the listener.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Io`](crate::RelayError::Io) if the address cannot be bound.
    pub async fn bind(config: &RelayConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.socket_addr()).await?;
        let relay = Relay::start(config);
        let app = router(relay.handle(), config);
        Ok(Self {
            listener,
            relay,
            app,
        })
    }

    /// The address actually bound (useful with port 0).
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` resolves, then stop the relay actor.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the server fails while accepting connections.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let Self {
            listener,
            mut relay,
            app,
        } = self;

        if let Ok(addr) = listener.local_addr() {
            info!("relay listening on http://{addr}");
        }

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await;
        relay.shutdown().await;
        Ok(served?)
    }
}

impl std::fmt::Debug for RelayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayServer")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("relay", &self.relay)
            .finish()
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(relay): State<RelayHandle>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, relay))
}

/// Drive one established WebSocket connection until it closes.
async fn handle_socket(socket: WebSocket, relay: RelayHandle) {
    let (connection, outbound_rx) = match relay.connect().await {
        Ok(registered) => registered,
        Err(e) => {
            error!("cannot register connection: {e}");
            return;
        }
    };
    info!(%connection, "client connected");

    let (ws_sink, ws_stream) = socket.split();
    let outgoing = tokio::spawn(forward_outgoing(ws_sink, outbound_rx));

    process_incoming(ws_stream, connection, &relay).await;

    if let Err(e) = relay.disconnect(connection).await {
        debug!(%connection, "relay gone before disconnect: {e}");
    }
    outgoing.abort();
    info!(%connection, "client disconnected");
}

/// Forward serialized frames from the outbound queue to the socket.
async fn forward_outgoing(
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<String>,
) {
    while let Some(json) = outbound_rx.recv().await {
        if ws_sink.send(Message::Text(json.into())).await.is_err() {
            break;
        }
    }
    let _ = ws_sink.close().await;
}

/// Decode inbound frames and hand them to the relay.
///
/// Frames that are not a known event are dropped without a reply.
async fn process_incoming(
    mut ws_stream: SplitStream<WebSocket>,
    connection: ConnectionId,
    relay: &RelayHandle,
) {
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(message) => {
                    if relay.dispatch(connection, message).await.is_err() {
                        debug!(%connection, "relay stopped, closing connection");
                        break;
                    }
                }
                Err(e) => {
                    debug!(%connection, "ignoring unparseable frame: {e}");
                }
            },
            Ok(Message::Binary(_)) => {
                debug!(%connection, "received binary frame, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                debug!(%connection, "received close frame");
                break;
            }
            Err(e) => {
                debug!(%connection, "WebSocket error: {e}");
                break;
            }
        }
    }
}
