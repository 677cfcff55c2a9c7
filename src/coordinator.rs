//! Session coordinator: one handler per inbound event.
//!
//! Handlers read and mutate the [`RoomStateStore`], consult [`Membership`]
//! for room sizes, and return the [`Dispatch`]es to send. They do no I/O, so
//! the relay actor can run them to completion one event at a time.
//!
//! Policy for bad input is "skip the mutation, keep the broadcast": a
//! `sync-state` or `control-action` whose typed view does not decode, or that
//! targets a room without a record, is still forwarded verbatim to peers.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use crate::membership::{Dispatch, Membership};
use crate::protocol::{
    payload_room, ClientMessage, ConnectionId, ControlAction, PlaySongRequest, RoomMembership,
    RoomState, ServerMessage, SyncStateUpdate,
};
use crate::store::RoomStateStore;

/// Source of wall-clock time in epoch milliseconds.
pub trait Clock: Send + 'static {
    fn now_millis(&self) -> u64;
}

/// [`Clock`] backed by [`SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default()
    }
}

/// Interprets inbound events against the room state store.
#[derive(Debug)]
pub struct SessionCoordinator<C = SystemClock> {
    store: RoomStateStore,
    clock: C,
}

impl SessionCoordinator<SystemClock> {
    /// Coordinator over an empty store using the system clock.
    pub fn new() -> Self {
        Self::with_clock(RoomStateStore::new(), SystemClock)
    }
}

impl Default for SessionCoordinator<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> SessionCoordinator<C> {
    /// Coordinator over an existing store with a custom clock.
    pub fn with_clock(store: RoomStateStore, clock: C) -> Self {
        Self { store, clock }
    }

    /// Read access to the room state store.
    pub fn store(&self) -> &RoomStateStore {
        &self.store
    }

    /// Route an inbound message to its handler.
    pub fn handle(
        &mut self,
        sender: ConnectionId,
        message: ClientMessage,
        membership: &mut impl Membership,
    ) -> Vec<Dispatch> {
        match message {
            ClientMessage::CreateRoom(room) => self.create_room(sender, &room, membership),
            ClientMessage::JoinRoom(room) => self.join_room(sender, &room, membership),
            ClientMessage::SyncState(payload) => self.sync_state(sender, payload),
            ClientMessage::PlaySong(request) => self.play_song(sender, request),
            ClientMessage::ControlAction(payload) => self.control_action(sender, payload),
        }
    }

    /// `create-room`: join, reset the room to "no state", announce the size.
    pub fn create_room(
        &mut self,
        sender: ConnectionId,
        room: &str,
        membership: &mut impl Membership,
    ) -> Vec<Dispatch> {
        membership.join(sender, room);
        let users = membership.room_size(room).max(1);
        info!(%sender, room, users, "room created");

        self.store.set(room, None);

        vec![Dispatch::to_room(
            room,
            ServerMessage::RoomCreated(RoomMembership {
                room_id: room.to_owned(),
                users,
            }),
        )]
    }

    /// `join-room`: join, announce the size, then hand the joiner the current
    /// track if there is one.
    pub fn join_room(
        &mut self,
        sender: ConnectionId,
        room: &str,
        membership: &mut impl Membership,
    ) -> Vec<Dispatch> {
        membership.join(sender, room);
        let users = membership.room_size(room).max(1);
        info!(%sender, room, users, "joined room");

        let mut dispatches = vec![Dispatch::to_room(
            room,
            ServerMessage::RoomJoined(RoomMembership {
                room_id: room.to_owned(),
                users,
            }),
        )];
        if let Some(state) = self.store.get(room) {
            dispatches.push(Dispatch::to_connection(
                sender,
                ServerMessage::PlaySong(state.clone()),
            ));
        }
        dispatches
    }

    /// `sync-state`: overwrite state and time if the room has a record, then
    /// forward the raw payload to everyone else.
    pub fn sync_state(
        &mut self,
        sender: ConnectionId,
        payload: serde_json::Value,
    ) -> Vec<Dispatch> {
        let Some(room) = payload_room(&payload).map(str::to_owned) else {
            debug!(%sender, "sync-state without a room, dropping");
            return Vec::new();
        };

        match (
            self.store.get_mut(&room),
            SyncStateUpdate::from_payload(&payload),
        ) {
            (Some(state), Some(update)) => state.apply_sync(&update),
            (None, _) => debug!(room = %room, "sync-state for room without a track"),
            (Some(_), None) => {
                debug!(room = %room, "malformed sync-state, forwarding without applying")
            }
        }

        vec![Dispatch::to_room_except(
            room,
            sender,
            ServerMessage::SyncState(payload),
        )]
    }

    /// `play-song`: replace the room's record with a fresh one and send it to
    /// everyone else.
    pub fn play_song(&mut self, sender: ConnectionId, request: PlaySongRequest) -> Vec<Dispatch> {
        let state = RoomState::start(&request, self.clock.now_millis());
        info!(
            %sender,
            room = %request.room,
            video_id = %state.video_id,
            start_at = state.start_at,
            "playing song"
        );

        self.store.set(request.room.clone(), Some(state.clone()));

        vec![Dispatch::to_room_except(
            request.room,
            sender,
            ServerMessage::PlaySong(state),
        )]
    }

    /// `control-action`: apply seek/pause/play if the room has a record, then
    /// forward the raw payload to everyone else.
    pub fn control_action(
        &mut self,
        sender: ConnectionId,
        payload: serde_json::Value,
    ) -> Vec<Dispatch> {
        let Some(room) = payload_room(&payload).map(str::to_owned) else {
            debug!(%sender, "control-action without a room, dropping");
            return Vec::new();
        };

        match (
            self.store.get_mut(&room),
            ControlAction::from_payload(&payload),
        ) {
            (Some(state), Some(action)) => state.apply_control(action),
            (None, _) => debug!(room = %room, "control-action for room without a track"),
            (Some(_), None) => {
                debug!(room = %room, "malformed control-action, forwarding without applying")
            }
        }

        vec![Dispatch::to_room_except(
            room,
            sender,
            ServerMessage::ControlAction(payload),
        )]
    }

    /// A connection is going away: leave every room and tell the remaining
    /// members how many are left.
    pub fn disconnect(
        &mut self,
        connection: ConnectionId,
        membership: &mut impl Membership,
    ) -> Vec<Dispatch> {
        membership
            .leave_all(connection)
            .into_iter()
            .map(|room| {
                let users = membership.room_size(&room);
                debug!(%connection, room = %room, users, "user left room");
                Dispatch::to_room(
                    room.clone(),
                    ServerMessage::UserLeft(RoomMembership {
                        room_id: room,
                        users,
                    }),
                )
            })
            .collect()
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
    use crate::membership::Audience;
    use crate::protocol::{PlaybackState, RoomId};
    use serde_json::json;
    use std::collections::{BTreeMap, BTreeSet};
    use uuid::Uuid;

    // ── Test doubles ────────────────────────────────────────────────

    struct FixedClock(u64);

    impl Clock for FixedClock {
        fn now_millis(&self) -> u64 {
            self.0
        }
    }

    #[derive(Default)]
    struct TestMembership {
        rooms: BTreeMap<RoomId, BTreeSet<ConnectionId>>,
    }

    impl Membership for TestMembership {
        fn join(&mut self, connection: ConnectionId, room: &str) {
            self.rooms.entry(room.into()).or_default().insert(connection);
        }

        fn room_size(&self, room: &str) -> usize {
            self.rooms.get(room).map_or(0, BTreeSet::len)
        }

        fn leave_all(&mut self, connection: ConnectionId) -> Vec<RoomId> {
            let mut left = Vec::new();
            for (room, members) in &mut self.rooms {
                if members.remove(&connection) {
                    left.push(room.clone());
                }
            }
            left
        }
    }

    const NOW: u64 = 1_700_000_000_000;

    fn coordinator() -> SessionCoordinator<FixedClock> {
        SessionCoordinator::with_clock(RoomStateStore::new(), FixedClock(NOW))
    }

    fn a() -> ConnectionId {
        Uuid::from_u128(1)
    }

    fn b() -> ConnectionId {
        Uuid::from_u128(2)
    }

    fn play(room: &str, video_id: &str) -> PlaySongRequest {
        PlaySongRequest {
            room: room.into(),
            video_id: video_id.into(),
            title: "T".into(),
            channel: "C".into(),
        }
    }

    // ── create-room / join-room ─────────────────────────────────────

    #[test]
    fn create_room_announces_size_including_creator() {
        let mut coord = coordinator();
        let mut members = TestMembership::default();

        let out = coord.create_room(a(), "r1", &mut members);

        assert_eq!(
            out,
            vec![Dispatch::to_room(
                "r1",
                ServerMessage::RoomCreated(RoomMembership {
                    room_id: "r1".into(),
                    users: 1
                })
            )]
        );
        assert!(coord.store().contains_room("r1"));
        assert!(coord.store().get("r1").is_none());
    }

    #[test]
    fn create_room_resets_an_existing_track() {
        let mut coord = coordinator();
        let mut members = TestMembership::default();
        coord.play_song(a(), play("r1", "v1"));

        coord.create_room(a(), "r1", &mut members);

        assert!(coord.store().get("r1").is_none());
    }

    #[test]
    fn join_room_without_track_sends_only_membership() {
        let mut coord = coordinator();
        let mut members = TestMembership::default();
        coord.create_room(a(), "r1", &mut members);

        let out = coord.join_room(b(), "r1", &mut members);

        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0].message,
            ServerMessage::RoomJoined(RoomMembership {
                room_id: "r1".into(),
                users: 2
            })
        );
        assert_eq!(out[0].audience, Audience::Room("r1".into()));
    }

    #[test]
    fn late_joiner_gets_exactly_one_unicast_with_original_start() {
        let mut coord = coordinator();
        let mut members = TestMembership::default();
        coord.create_room(a(), "r1", &mut members);
        coord.play_song(a(), play("r1", "X"));

        // A later clock must not change the start time sent to the joiner.
        coord.clock = FixedClock(NOW + 60_000);
        let out = coord.join_room(b(), "r1", &mut members);

        let unicasts: Vec<_> = out
            .iter()
            .filter(|d| d.audience == Audience::Connection(b()))
            .collect();
        assert_eq!(unicasts.len(), 1);
        match &unicasts[0].message {
            ServerMessage::PlaySong(state) => {
                assert_eq!(state.video_id, "X");
                assert_eq!(state.start_at, NOW + 2000);
            }
            other => panic!("expected play-song, got {other:?}"),
        }
    }

    // ── play-song ───────────────────────────────────────────────────

    #[test]
    fn play_song_forces_playing_from_zero() {
        let mut coord = coordinator();
        let request: PlaySongRequest = serde_json::from_value(json!({
            "room": "r1", "videoId": "v1", "title": "T", "channel": "C",
            "state": "paused", "time": 99
        }))
        .unwrap();

        let out = coord.play_song(a(), request);

        let expected = RoomState {
            video_id: "v1".into(),
            title: "T".into(),
            channel: "C".into(),
            state: PlaybackState::Playing,
            time: 0.0,
            start_at: NOW + 2000,
        };
        assert_eq!(coord.store().get("r1"), Some(&expected));
        assert_eq!(
            out,
            vec![Dispatch::to_room_except(
                "r1",
                a(),
                ServerMessage::PlaySong(expected)
            )]
        );
    }

    // ── sync-state ──────────────────────────────────────────────────

    #[test]
    fn sync_state_without_track_creates_nothing_but_forwards() {
        let mut coord = coordinator();
        let payload = json!({"room": "r9", "state": "paused", "time": 12});

        let out = coord.sync_state(a(), payload.clone());

        assert!(!coord.store().contains_room("r9"));
        assert_eq!(
            out,
            vec![Dispatch::to_room_except(
                "r9",
                a(),
                ServerMessage::SyncState(payload)
            )]
        );
    }

    #[test]
    fn sync_state_overwrites_state_and_time() {
        let mut coord = coordinator();
        coord.play_song(a(), play("r1", "v1"));

        coord.sync_state(b(), json!({"room": "r1", "state": "paused", "time": 30.5}));

        let state = coord.store().get("r1").unwrap();
        assert_eq!(state.state, PlaybackState::Paused);
        assert_eq!(state.time, 30.5);
    }

    #[test]
    fn malformed_sync_state_is_forwarded_unapplied() {
        let mut coord = coordinator();
        coord.play_song(a(), play("r1", "v1"));
        let payload = json!({"room": "r1", "state": "rewinding"});

        let out = coord.sync_state(b(), payload.clone());

        let state = coord.store().get("r1").unwrap();
        assert_eq!(state.state, PlaybackState::Playing);
        assert_eq!(state.time, 0.0);
        assert_eq!(out[0].message, ServerMessage::SyncState(payload));
    }

    #[test]
    fn sync_state_without_room_is_dropped() {
        let mut coord = coordinator();
        assert!(coord.sync_state(a(), json!({"state": "paused", "time": 1})).is_empty());
    }

    // ── control-action ──────────────────────────────────────────────

    #[test]
    fn control_action_without_track_creates_nothing() {
        let mut coord = coordinator();
        let out = coord.control_action(a(), json!({"room": "r1", "action": "pause"}));
        assert!(coord.store().is_empty());
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn seek_sets_time_and_keeps_state() {
        let mut coord = coordinator();
        coord.play_song(a(), play("r1", "v1"));

        coord.control_action(b(), json!({"room": "r1", "action": "seek", "time": 42}));

        let state = coord.store().get("r1").unwrap();
        assert_eq!(state.time, 42.0);
        assert_eq!(state.state, PlaybackState::Playing);
    }

    #[test]
    fn pause_then_play_toggles_state() {
        let mut coord = coordinator();
        coord.play_song(a(), play("r1", "v1"));

        coord.control_action(b(), json!({"room": "r1", "action": "pause"}));
        assert_eq!(coord.store().get("r1").unwrap().state, PlaybackState::Paused);

        coord.control_action(b(), json!({"room": "r1", "action": "play"}));
        assert_eq!(coord.store().get("r1").unwrap().state, PlaybackState::Playing);
    }

    #[test]
    fn bogus_action_changes_nothing_but_is_forwarded_raw() {
        let mut coord = coordinator();
        coord.play_song(a(), play("r1", "v1"));
        let before = coord.store().get("r1").cloned();
        let payload = json!({"room": "r1", "action": "bogus"});

        let out = coord.control_action(b(), payload.clone());

        assert_eq!(coord.store().get("r1").cloned(), before);
        assert_eq!(
            out,
            vec![Dispatch::to_room_except(
                "r1",
                b(),
                ServerMessage::ControlAction(payload)
            )]
        );
    }

    #[test]
    fn seek_without_time_is_forwarded_unapplied() {
        let mut coord = coordinator();
        coord.play_song(a(), play("r1", "v1"));
        coord.control_action(b(), json!({"room": "r1", "action": "seek", "time": 10}));

        let out = coord.control_action(b(), json!({"room": "r1", "action": "seek"}));

        assert_eq!(coord.store().get("r1").unwrap().time, 10.0);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn sync_and_seek_are_last_write_wins() {
        let mut coord = coordinator();
        coord.play_song(a(), play("r1", "v1"));

        coord.control_action(b(), json!({"room": "r1", "action": "seek", "time": 50}));
        coord.sync_state(a(), json!({"room": "r1", "state": "playing", "time": 12}));
        assert_eq!(coord.store().get("r1").unwrap().time, 12.0);

        coord.control_action(b(), json!({"room": "r1", "action": "seek", "time": 70}));
        assert_eq!(coord.store().get("r1").unwrap().time, 70.0);
    }

    // ── disconnect ──────────────────────────────────────────────────

    #[test]
    fn disconnect_reports_post_departure_size_per_room() {
        let mut coord = coordinator();
        let mut members = TestMembership::default();
        coord.create_room(a(), "r1", &mut members);
        coord.join_room(b(), "r1", &mut members);
        coord.create_room(b(), "r2", &mut members);

        let out = coord.disconnect(b(), &mut members);

        assert_eq!(
            out,
            vec![
                Dispatch::to_room(
                    "r1",
                    ServerMessage::UserLeft(RoomMembership {
                        room_id: "r1".into(),
                        users: 1
                    })
                ),
                Dispatch::to_room(
                    "r2",
                    ServerMessage::UserLeft(RoomMembership {
                        room_id: "r2".into(),
                        users: 0
                    })
                ),
            ]
        );
    }

    #[test]
    fn disconnect_keeps_room_state() {
        let mut coord = coordinator();
        let mut members = TestMembership::default();
        coord.create_room(a(), "r1", &mut members);
        coord.play_song(a(), play("r1", "v1"));

        coord.disconnect(a(), &mut members);

        assert!(coord.store().get("r1").is_some());
    }

    // ── Scenario ────────────────────────────────────────────────────

    #[test]
    fn create_join_play_pause_scenario() {
        let mut coord = coordinator();
        let mut members = TestMembership::default();

        coord.handle(a(), ClientMessage::CreateRoom("r1".into()), &mut members);
        coord.handle(b(), ClientMessage::JoinRoom("r1".into()), &mut members);

        let out = coord.handle(a(), ClientMessage::PlaySong(play("r1", "v1")), &mut members);
        assert_eq!(out[0].audience, Audience::RoomExcept("r1".into(), a()));
        match &out[0].message {
            ServerMessage::PlaySong(state) => {
                assert_eq!(state.video_id, "v1");
                assert_eq!(state.title, "T");
                assert_eq!(state.channel, "C");
                assert_eq!(state.state, PlaybackState::Playing);
                assert_eq!(state.time, 0.0);
                assert_eq!(state.start_at, NOW + 2000);
            }
            other => panic!("expected play-song, got {other:?}"),
        }

        let pause = json!({"room": "r1", "action": "pause"});
        let out = coord.handle(b(), ClientMessage::ControlAction(pause.clone()), &mut members);
        assert_eq!(
            out,
            vec![Dispatch::to_room_except(
                "r1",
                b(),
                ServerMessage::ControlAction(pause)
            )]
        );
        assert_eq!(coord.store().get("r1").unwrap().state, PlaybackState::Paused);
    }
}
