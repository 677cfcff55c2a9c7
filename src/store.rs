//! In-memory room state store.
//!
//! Maps a room id to either "nothing selected yet" or exactly one
//! [`RoomState`]. Entries are never removed; they live as long as the store.

use std::collections::HashMap;

use crate::protocol::{RoomId, RoomState};

/// Room id → now-playing record.
///
/// The store has no behaviour of its own and does no locking: it is owned by
/// the relay actor, which applies events one at a time.
#[derive(Debug, Default)]
pub struct RoomStateStore {
    rooms: HashMap<RoomId, Option<RoomState>>,
}

impl RoomStateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current record for `room`, if a track has been selected.
    pub fn get(&self, room: &str) -> Option<&RoomState> {
        self.rooms.get(room).and_then(Option::as_ref)
    }

    /// Mutable access to the current record for `room`, if any.
    pub fn get_mut(&mut self, room: &str) -> Option<&mut RoomState> {
        self.rooms.get_mut(room).and_then(Option::as_mut)
    }

    /// Replace whatever `room` maps to. `None` records "no state".
    pub fn set(&mut self, room: impl Into<RoomId>, state: Option<RoomState>) {
        self.rooms.insert(room.into(), state);
    }

    /// Whether the store has seen `room` at all, with or without a record.
    pub fn contains_room(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }

    /// Number of rooms the store knows about.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Returns `true` if no room has been created or played in yet.
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
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
    use crate::protocol::PlaybackState;

    fn record(video_id: &str) -> RoomState {
        RoomState {
            video_id: video_id.into(),
            title: "T".into(),
            channel: "C".into(),
            state: PlaybackState::Playing,
            time: 0.0,
            start_at: 1_000,
        }
    }

    #[test]
    fn unknown_room_has_no_state() {
        let store = RoomStateStore::new();
        assert!(store.get("r1").is_none());
        assert!(!store.contains_room("r1"));
        assert!(store.is_empty());
    }

    #[test]
    fn empty_entry_is_known_but_has_no_state() {
        let mut store = RoomStateStore::new();
        store.set("r1", None);
        assert!(store.contains_room("r1"));
        assert!(store.get("r1").is_none());
        assert!(store.get_mut("r1").is_none());
    }

    #[test]
    fn set_replaces_the_single_record() {
        let mut store = RoomStateStore::new();
        store.set("r1", Some(record("a")));
        store.set("r1", Some(record("b")));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("r1").unwrap().video_id, "b");
    }

    #[test]
    fn get_mut_edits_in_place() {
        let mut store = RoomStateStore::new();
        store.set("r1", Some(record("a")));
        store.get_mut("r1").unwrap().state = PlaybackState::Paused;
        assert_eq!(store.get("r1").unwrap().state, PlaybackState::Paused);
    }
}
