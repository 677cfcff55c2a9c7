//! Events emitted by [`RelayClient`](crate::client::RelayClient).

use crate::protocol::{RoomId, RoomState, ServerMessage};

/// Something the client observed: either a relay message or a change in the
/// transport's lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// Synthetic: the transport loop started. Always the first event.
    Connected,
    /// A room was created (by us or by whoever shares the room id).
    RoomCreated { room_id: RoomId, users: usize },
    /// Someone joined a room we are in.
    RoomJoined { room_id: RoomId, users: usize },
    /// A new track, or the current track right after we joined.
    ///
    /// Start local playback after
    /// [`RoomState::preload_delay`](crate::protocol::RoomState::preload_delay).
    PlaySong(RoomState),
    /// A peer's raw `sync-state` payload.
    SyncState(serde_json::Value),
    /// A peer's raw `control-action` payload.
    ControlAction(serde_json::Value),
    /// Someone left a room we are in.
    UserLeft { room_id: RoomId, users: usize },
    /// Synthetic: the transport loop exited. Always the last event.
    Disconnected { reason: Option<String> },
}

impl From<ServerMessage> for RelayEvent {
    fn from(message: ServerMessage) -> Self {
        match message {
            ServerMessage::RoomCreated(m) => Self::RoomCreated {
                room_id: m.room_id,
                users: m.users,
            },
            ServerMessage::RoomJoined(m) => Self::RoomJoined {
                room_id: m.room_id,
                users: m.users,
            },
            ServerMessage::PlaySong(state) => Self::PlaySong(state),
            ServerMessage::SyncState(payload) => Self::SyncState(payload),
            ServerMessage::ControlAction(payload) => Self::ControlAction(payload),
            ServerMessage::UserLeft(m) => Self::UserLeft {
                room_id: m.room_id,
                users: m.users,
            },
        }
    }
}
