//! # Watch Party Relay
//!
//! A small real-time relay that keeps a group of viewers playing the same
//! video at the same position.
//!
//! Clients connect over WebSocket and exchange JSON events of the form
//! `{"event": "<name>", "data": ...}`. The relay groups connections into
//! rooms, remembers what each room is playing, stamps new tracks with a start
//! time two seconds in the future so everyone can preload, and fans playback
//! updates out to the rest of the room.
//!
//! ## Features
//!
//! - **`server`** (default): the axum HTTP/WebSocket front end and the
//!   `watch-party-relay` binary
//! - **`transport-websocket`** (default): [`WebSocketTransport`] for
//!   [`RelayClient`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), watch_party_relay::RelayError> {
//! use watch_party_relay::{RelayClient, RelayClientConfig, RelayEvent, WebSocketTransport};
//!
//! let transport = WebSocketTransport::connect("ws://localhost:3000/ws").await?;
//! let (mut client, mut events) = RelayClient::start(transport, RelayClientConfig::default());
//!
//! client.join_room("movie-night")?;
//!
//! while let Some(event) = events.recv().await {
//!     if let RelayEvent::PlaySong(track) = event {
//!         println!("now playing {}", track.title);
//!         break;
//!     }
//! }
//!
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod membership;
pub mod protocol;
pub mod relay;
#[cfg(feature = "server")]
pub mod server;
pub mod store;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use client::{RelayClient, RelayClientConfig};
pub use config::RelayConfig;
pub use coordinator::SessionCoordinator;
pub use error::{RelayError, Result};
pub use event::RelayEvent;
pub use protocol::{ClientMessage, RoomState, ServerMessage};
pub use relay::{Relay, RelayHandle};
#[cfg(feature = "server")]
pub use server::RelayServer;
pub use transport::Transport;

#[cfg(feature = "transport-websocket")]
pub use transports::WebSocketTransport;
