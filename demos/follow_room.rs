//! # Follow Room Example
//!
//! Joins a watch-party room and prints what the room is doing:
//!
//! 1. Connect to a relay via WebSocket
//! 2. Join (or create) a room
//! 3. Print membership changes and playback updates, including how long to
//!    wait before starting a new track
//! 4. Shut down gracefully on Ctrl+C or disconnect
//!
//! ## Running
//!
//! ```sh
//! # Start the relay on localhost:3000, then:
//! cargo run --example follow_room
//!
//! # Override the relay URL or room:
//! RELAY_URL=ws://my-host:3000/ws ROOM=movie-night cargo run --example follow_room
//!
//! # Create the room (clearing its track) instead of joining it:
//! CREATE=1 cargo run --example follow_room
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use watch_party_relay::protocol::payload_room;
use watch_party_relay::{RelayClient, RelayClientConfig, RelayEvent, WebSocketTransport};

const DEFAULT_URL: &str = "ws://localhost:3000/ws";
const DEFAULT_ROOM: &str = "lobby";

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let url = std::env::var("RELAY_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    let room = std::env::var("ROOM").unwrap_or_else(|_| DEFAULT_ROOM.to_string());
    let create = std::env::var_os("CREATE").is_some();
    tracing::info!("Connecting to {url}");

    // ── Connect ─────────────────────────────────────────────────────
    let transport = WebSocketTransport::connect(&url).await?;
    let (mut client, mut event_rx) = RelayClient::start(transport, RelayClientConfig::default());

    if create {
        client.create_room(room.as_str())?;
    } else {
        client.join_room(room.as_str())?;
    }

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else {
                    tracing::info!("Event channel closed");
                    break;
                };
                match event {
                    RelayEvent::Connected => tracing::info!("Connected, entering room {room}"),
                    RelayEvent::RoomCreated { room_id, users } => {
                        tracing::info!("Room {room_id} created ({users} watching)");
                    }
                    RelayEvent::RoomJoined { room_id, users } => {
                        tracing::info!("Someone joined {room_id} ({users} watching)");
                    }
                    RelayEvent::UserLeft { room_id, users } => {
                        tracing::info!("Someone left {room_id} ({users} watching)");
                    }
                    RelayEvent::PlaySong(track) => {
                        let delay = track.preload_delay(now_ms());
                        tracing::info!(
                            "Now playing \"{}\" by {} ({}); start in {} ms at {:.1}s, {:?}",
                            track.title,
                            track.channel,
                            track.video_id,
                            delay.as_millis(),
                            track.time,
                            track.state,
                        );
                    }
                    RelayEvent::SyncState(payload) => {
                        tracing::info!(
                            "Sync for {}: {} at {}",
                            payload_room(&payload).unwrap_or("?"),
                            payload["state"],
                            payload["time"],
                        );
                    }
                    RelayEvent::ControlAction(payload) => {
                        tracing::info!("Control: {payload}");
                    }
                    RelayEvent::Disconnected { reason } => {
                        let reason = reason.as_deref().unwrap_or("relay closed");
                        tracing::warn!("Disconnected: {reason}");
                        break;
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down");
                break;
            }
        }
    }

    if let Some(playing) = client.now_playing().await {
        tracing::info!("Last known track: {} at {:.1}s", playing.video_id, playing.time);
    }
    client.shutdown().await;
    Ok(())
}
