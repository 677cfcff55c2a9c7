//! Wire protocol for the watch-party relay.
//!
//! Every WebSocket text frame carries exactly one JSON object of the form
//! `{"event": "<name>", "data": <payload>}`. Event names are kebab-case and
//! room-state fields are camelCase, so the frames stay compatible with the
//! browser player that drives the relay.
//!
//! `sync-state` and `control-action` payloads are kept as raw JSON: the relay
//! forwards them to peers exactly as received. Typed views
//! ([`SyncStateUpdate`], [`ControlAction`]) are decoded from the raw value only
//! to decide whether the room state should change.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Type aliases ────────────────────────────────────────────────────

/// Opaque room identifier chosen by clients.
pub type RoomId = String;

/// Unique identifier assigned to every WebSocket connection.
pub type ConnectionId = Uuid;

/// Delay added to a new track's start time so every receiver can buffer.
pub const PRELOAD_OFFSET: Duration = Duration::from_millis(2000);

// ── Room state ──────────────────────────────────────────────────────

/// Playback state of a room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Playing,
    Paused,
}

/// The relay's canonical record of what is currently playing in a room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoomState {
    pub video_id: String,
    pub title: String,
    pub channel: String,
    pub state: PlaybackState,
    /// Playback position in seconds as of the last update.
    pub time: f64,
    /// Epoch milliseconds at which playback of this track is scheduled to begin.
    pub start_at: u64,
}

impl RoomState {
    /// Build the record for a freshly started track.
    ///
    /// Any state or position the requester sent is ignored: a new track always
    /// starts playing from zero, [`PRELOAD_OFFSET`] after `now_ms`.
    pub fn start(request: &PlaySongRequest, now_ms: u64) -> Self {
        let offset = u64::try_from(PRELOAD_OFFSET.as_millis()).unwrap_or(u64::MAX);
        Self {
            video_id: request.video_id.clone(),
            title: request.title.clone(),
            channel: request.channel.clone(),
            state: PlaybackState::Playing,
            time: 0.0,
            start_at: now_ms.saturating_add(offset),
        }
    }

    /// Overwrite play state and position from a periodic sync update.
    pub fn apply_sync(&mut self, update: &SyncStateUpdate) {
        self.state = update.state;
        self.time = update.time;
    }

    /// Apply a transport control. Unrecognized actions leave the record untouched.
    pub fn apply_control(&mut self, action: ControlAction) {
        match action {
            ControlAction::Seek { time } => self.time = time,
            ControlAction::Pause => self.state = PlaybackState::Paused,
            ControlAction::Play => self.state = PlaybackState::Playing,
            ControlAction::Unrecognized => {}
        }
    }

    /// How long a receiver should wait before starting local playback.
    pub fn preload_delay(&self, now_ms: u64) -> Duration {
        Duration::from_millis(self.start_at.saturating_sub(now_ms))
    }
}

// ── Payloads ────────────────────────────────────────────────────────

/// Payload of an inbound `play-song` event.
///
/// Extra fields (a client-side `state` or `time`) are accepted and ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlaySongRequest {
    pub room: RoomId,
    pub video_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub channel: String,
}

/// Typed view of a `sync-state` payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SyncStateUpdate {
    pub state: PlaybackState,
    pub time: f64,
}

impl SyncStateUpdate {
    /// Decode the typed view from a raw payload.
    ///
    /// Returns `None` when `state` is missing or not one of the two known
    /// values, or when `time` is missing or negative.
    pub fn from_payload(payload: &serde_json::Value) -> Option<Self> {
        let update = Self::deserialize(payload).ok()?;
        (update.time >= 0.0).then_some(update)
    }
}

/// Typed view of a `control-action` payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ControlAction {
    Seek { time: f64 },
    Pause,
    Play,
    /// Any other action label. Forwarded to peers, never applied.
    #[serde(other)]
    Unrecognized,
}

impl ControlAction {
    /// Decode the typed view from a raw payload.
    ///
    /// Returns `None` for payloads that name a known action but cannot be
    /// applied: `seek` without a non-negative `time`, or a missing or
    /// non-string `action`.
    pub fn from_payload(payload: &serde_json::Value) -> Option<Self> {
        match Self::deserialize(payload).ok()? {
            Self::Seek { time } if time < 0.0 => None,
            action => Some(action),
        }
    }
}

/// Extract the target room of a raw `sync-state` / `control-action` payload.
pub fn payload_room(payload: &serde_json::Value) -> Option<&str> {
    payload.get("room").and_then(serde_json::Value::as_str)
}

/// Build the raw payload a client sends for `sync-state`.
pub fn sync_state_payload(room: &str, update: SyncStateUpdate) -> serde_json::Value {
    serde_json::json!({
        "room": room,
        "state": update.state,
        "time": update.time,
    })
}

/// Build the raw payload a client sends for `control-action`.
pub fn control_action_payload(room: &str, action: ControlAction) -> serde_json::Value {
    let mut payload = match action {
        ControlAction::Seek { time } => serde_json::json!({ "action": "seek", "time": time }),
        ControlAction::Pause => serde_json::json!({ "action": "pause" }),
        ControlAction::Play => serde_json::json!({ "action": "play" }),
        ControlAction::Unrecognized => serde_json::json!({ "action": "unrecognized" }),
    };
    if let Some(fields) = payload.as_object_mut() {
        fields.insert("room".into(), serde_json::Value::from(room));
    }
    payload
}

/// Membership notice carried by `room-created`, `room-joined` and `user-left`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomMembership {
    pub room_id: RoomId,
    /// Number of connections in the room at the instant of the broadcast.
    pub users: usize,
}

// ── Messages ────────────────────────────────────────────────────────

/// Events sent from a client to the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Join a room and reset its now-playing record.
    CreateRoom(RoomId),
    /// Join a room, receiving the current track if one is selected.
    JoinRoom(RoomId),
    /// Periodic "where are we" update from a controlling client.
    SyncState(serde_json::Value),
    /// Start a new track for the room.
    PlaySong(PlaySongRequest),
    /// Seek, pause or play.
    ControlAction(serde_json::Value),
}

/// Events sent from the relay to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    RoomCreated(RoomMembership),
    RoomJoined(RoomMembership),
    /// A new track, or the current track for a late joiner.
    PlaySong(RoomState),
    /// A peer's raw `sync-state` payload.
    SyncState(serde_json::Value),
    /// A peer's raw `control-action` payload.
    ControlAction(serde_json::Value),
    UserLeft(RoomMembership),
}

impl ServerMessage {
    /// Wire name of the event, for logging.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::RoomCreated(_) => "room-created",
            Self::RoomJoined(_) => "room-joined",
            Self::PlaySong(_) => "play-song",
            Self::SyncState(_) => "sync-state",
            Self::ControlAction(_) => "control-action",
            Self::UserLeft(_) => "user-left",
        }
    }
}

impl ClientMessage {
    /// Wire name of the event, for logging.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::CreateRoom(_) => "create-room",
            Self::JoinRoom(_) => "join-room",
            Self::SyncState(_) => "sync-state",
            Self::PlaySong(_) => "play-song",
            Self::ControlAction(_) => "control-action",
        }
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
    use serde_json::json;

    fn song() -> PlaySongRequest {
        PlaySongRequest {
            room: "r1".into(),
            video_id: "v1".into(),
            title: "T".into(),
            channel: "C".into(),
        }
    }

    #[test]
    fn start_forces_playing_from_zero_with_preload_offset() {
        let state = RoomState::start(&song(), 10_000);
        assert_eq!(state.state, PlaybackState::Playing);
        assert_eq!(state.time, 0.0);
        assert_eq!(state.start_at, 12_000);
        assert_eq!(state.video_id, "v1");
    }

    #[test]
    fn preload_delay_saturates_once_start_has_passed() {
        let state = RoomState::start(&song(), 10_000);
        assert_eq!(state.preload_delay(10_500), Duration::from_millis(1_500));
        assert_eq!(state.preload_delay(20_000), Duration::ZERO);
    }

    #[test]
    fn seek_changes_time_only() {
        let mut state = RoomState::start(&song(), 0);
        state.apply_control(ControlAction::Seek { time: 42.0 });
        assert_eq!(state.time, 42.0);
        assert_eq!(state.state, PlaybackState::Playing);
    }

    #[test]
    fn unrecognized_action_changes_nothing() {
        let mut state = RoomState::start(&song(), 0);
        let before = state.clone();
        state.apply_control(ControlAction::Unrecognized);
        assert_eq!(state, before);
    }

    #[test]
    fn control_action_decodes_known_and_unknown_labels() {
        assert_eq!(
            ControlAction::from_payload(&json!({"room": "r1", "action": "pause"})),
            Some(ControlAction::Pause)
        );
        assert_eq!(
            ControlAction::from_payload(&json!({"room": "r1", "action": "seek", "time": 42})),
            Some(ControlAction::Seek { time: 42.0 })
        );
        assert_eq!(
            ControlAction::from_payload(&json!({"room": "r1", "action": "bogus"})),
            Some(ControlAction::Unrecognized)
        );
    }

    #[test]
    fn control_action_rejects_unusable_payloads() {
        assert_eq!(
            ControlAction::from_payload(&json!({"room": "r1", "action": "seek"})),
            None
        );
        assert_eq!(
            ControlAction::from_payload(&json!({"room": "r1", "action": "seek", "time": -1})),
            None
        );
        assert_eq!(ControlAction::from_payload(&json!({"room": "r1"})), None);
        assert_eq!(
            ControlAction::from_payload(&json!({"room": "r1", "action": 7})),
            None
        );
    }

    #[test]
    fn sync_update_requires_known_state_and_time() {
        assert_eq!(
            SyncStateUpdate::from_payload(&json!({"room": "r", "state": "paused", "time": 3.5})),
            Some(SyncStateUpdate {
                state: PlaybackState::Paused,
                time: 3.5
            })
        );
        assert!(SyncStateUpdate::from_payload(&json!({"room": "r", "state": "buffering", "time": 1})).is_none());
        assert!(SyncStateUpdate::from_payload(&json!({"room": "r", "state": "paused"})).is_none());
        assert!(SyncStateUpdate::from_payload(&json!({"room": "r", "state": "paused", "time": -2})).is_none());
    }

    #[test]
    fn payload_room_only_accepts_strings() {
        assert_eq!(payload_room(&json!({"room": "r1"})), Some("r1"));
        assert_eq!(payload_room(&json!({"room": 5})), None);
        assert_eq!(payload_room(&json!("r1")), None);
    }

    #[test]
    fn control_payload_carries_room_and_label() {
        let payload = control_action_payload("r1", ControlAction::Seek { time: 9.0 });
        assert_eq!(payload, json!({"room": "r1", "action": "seek", "time": 9.0}));
        assert_eq!(
            ControlAction::from_payload(&payload),
            Some(ControlAction::Seek { time: 9.0 })
        );
    }
}
