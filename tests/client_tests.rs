#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Integration-style tests for `RelayClient`.
//!
//! Uses the shared `MockTransport` from `tests/common` to script relay
//! messages and checks the frames the client sends, the events it emits and
//! its local now-playing mirror.

mod common;

use std::time::Duration;

use serde_json::json;
use watch_party_relay::protocol::{ClientMessage, ControlAction, PlaybackState, SyncStateUpdate};
use watch_party_relay::{RelayClient, RelayClientConfig, RelayError, RelayEvent};

use common::{
    control_action_json, ok, play_song_json, room_created_json, room_joined_json,
    sync_state_json, track, user_left_json, ChannelTransport, MockTransport,
};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

#[allow(clippy::type_complexity)]
fn start_client(
    incoming: Vec<Option<Result<String, RelayError>>>,
) -> (
    RelayClient,
    tokio::sync::mpsc::Receiver<RelayEvent>,
    std::sync::Arc<std::sync::Mutex<Vec<String>>>,
    std::sync::Arc<std::sync::atomic::AtomicBool>,
) {
    let (transport, sent, closed) = MockTransport::new(incoming);
    let (client, events) = RelayClient::start(transport, RelayClientConfig::default());
    (client, events, sent, closed)
}

async fn expect_connected(rx: &mut tokio::sync::mpsc::Receiver<RelayEvent>) {
    let ev = rx.recv().await.expect("expected Connected event");
    assert_eq!(ev, RelayEvent::Connected, "first event should be Connected");
}

/// Give the transport loop a moment to flush queued commands.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

fn sent_messages(sent: &std::sync::Mutex<Vec<String>>) -> Vec<ClientMessage> {
    sent.lock()
        .unwrap()
        .iter()
        .map(|frame| serde_json::from_str(frame).expect("client frame parses"))
        .collect()
}

// ════════════════════════════════════════════════════════════════════
// Outgoing frames
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn api_methods_send_expected_frames() {
    let (mut client, mut events, sent, _closed) = start_client(vec![]);
    expect_connected(&mut events).await;

    client.create_room("r1").unwrap();
    client.join_room("r2").unwrap();
    client
        .play_song("r1", "dQw4w9WgXcQ", "Never Gonna", "Rick")
        .unwrap();
    client
        .sync_state(
            "r1",
            SyncStateUpdate {
                state: PlaybackState::Paused,
                time: 12.5,
            },
        )
        .unwrap();
    client
        .control("r1", ControlAction::Seek { time: 30.0 })
        .unwrap();
    settle().await;

    let messages = sent_messages(&sent);
    assert_eq!(messages.len(), 5);
    assert_eq!(messages[0], ClientMessage::CreateRoom("r1".into()));
    assert_eq!(messages[1], ClientMessage::JoinRoom("r2".into()));
    if let ClientMessage::PlaySong(request) = &messages[2] {
        assert_eq!(request.room, "r1");
        assert_eq!(request.video_id, "dQw4w9WgXcQ");
        assert_eq!(request.title, "Never Gonna");
        assert_eq!(request.channel, "Rick");
    } else {
        panic!("expected PlaySong, got {:?}", messages[2]);
    }
    assert_eq!(
        messages[3],
        ClientMessage::SyncState(json!({"room": "r1", "state": "paused", "time": 12.5}))
    );
    assert_eq!(
        messages[4],
        ClientMessage::ControlAction(json!({"room": "r1", "action": "seek", "time": 30.0}))
    );

    client.shutdown().await;
}

#[tokio::test]
async fn current_room_tracks_last_create_or_join() {
    let (mut client, mut events, _sent, _closed) = start_client(vec![]);
    expect_connected(&mut events).await;

    assert!(client.current_room().await.is_none());
    client.create_room("r1").unwrap();
    settle().await;
    assert_eq!(client.current_room().await.as_deref(), Some("r1"));

    client.join_room("r2").unwrap();
    settle().await;
    assert_eq!(client.current_room().await.as_deref(), Some("r2"));

    client.shutdown().await;
}

#[tokio::test]
async fn switching_rooms_clears_now_playing() {
    let (transport, relay_tx, _sent) = ChannelTransport::new();
    let (mut client, mut events) = RelayClient::start(transport, RelayClientConfig::default());
    expect_connected(&mut events).await;

    client.join_room("r1").unwrap();
    settle().await;
    relay_tx.send(ok(play_song_json("r1track", 5_000))).unwrap();
    events.recv().await.expect("PlaySong");
    assert_eq!(client.now_playing().await, Some(track("r1track", 5_000)));

    // Joining the room we are already in keeps its track.
    client.join_room("r1").unwrap();
    settle().await;
    assert_eq!(client.now_playing().await, Some(track("r1track", 5_000)));

    client.join_room("r2").unwrap();
    settle().await;
    assert_eq!(client.current_room().await.as_deref(), Some("r2"));
    assert!(client.now_playing().await.is_none());

    client.shutdown().await;
}

#[tokio::test]
async fn own_play_song_sets_now_playing() {
    let (mut client, mut events, _sent, _closed) = start_client(vec![]);
    expect_connected(&mut events).await;

    client.join_room("r1").unwrap();
    client.play_song("r2", "elsewhere", "T", "C").unwrap();
    settle().await;
    assert!(client.now_playing().await.is_none());

    client.play_song("r1", "mine", "My Title", "My Channel").unwrap();
    settle().await;
    let now = client.now_playing().await.expect("own track mirrored");
    assert_eq!(now.video_id, "mine");
    assert_eq!(now.title, "My Title");
    assert_eq!(now.channel, "My Channel");
    assert_eq!(now.state, PlaybackState::Playing);
    assert_eq!(now.time, 0.0);
    assert!(now.start_at > 0);

    client.shutdown().await;
}

#[tokio::test]
async fn own_sync_and_control_apply_to_mirrored_track() {
    let (transport, relay_tx, _sent) = ChannelTransport::new();
    let (mut client, mut events) = RelayClient::start(transport, RelayClientConfig::default());
    expect_connected(&mut events).await;

    client.join_room("r1").unwrap();
    settle().await;
    relay_tx.send(ok(play_song_json("abc", 5_000))).unwrap();
    events.recv().await.expect("PlaySong");

    client.control("r1", ControlAction::Pause).unwrap();
    settle().await;
    let now = client.now_playing().await.expect("track mirrored");
    assert_eq!(now.state, PlaybackState::Paused);

    client
        .sync_state(
            "r1",
            SyncStateUpdate {
                state: PlaybackState::Playing,
                time: 75.5,
            },
        )
        .unwrap();
    settle().await;
    let now = client.now_playing().await.expect("track mirrored");
    assert_eq!(now.state, PlaybackState::Playing);
    assert_eq!(now.time, 75.5);

    // Actions aimed at another room leave the mirror alone.
    client.control("r2", ControlAction::Seek { time: 1.0 }).unwrap();
    settle().await;
    assert_eq!(client.now_playing().await.expect("track mirrored").time, 75.5);
    assert_eq!(client.now_playing().await.expect("track").start_at, 5_000);

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Incoming events
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn membership_events_are_delivered_in_order() {
    let (mut client, mut events, _sent, _closed) = start_client(vec![
        ok(room_created_json("r1", 1)),
        ok(room_joined_json("r1", 2)),
        ok(user_left_json("r1", 1)),
    ]);
    expect_connected(&mut events).await;

    assert_eq!(
        events.recv().await.unwrap(),
        RelayEvent::RoomCreated {
            room_id: "r1".into(),
            users: 1
        }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        RelayEvent::RoomJoined {
            room_id: "r1".into(),
            users: 2
        }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        RelayEvent::UserLeft {
            room_id: "r1".into(),
            users: 1
        }
    );

    client.shutdown().await;
}

#[tokio::test]
async fn play_song_event_updates_now_playing() {
    let (mut client, mut events, _sent, _closed) =
        start_client(vec![ok(play_song_json("abc", 1_002_000))]);
    expect_connected(&mut events).await;

    let ev = events.recv().await.unwrap();
    let RelayEvent::PlaySong(state) = ev else {
        panic!("expected PlaySong, got {ev:?}");
    };
    assert_eq!(state.video_id, "abc");
    assert_eq!(state.preload_delay(1_000_000), Duration::from_millis(2000));
    assert_eq!(client.now_playing().await, Some(track("abc", 1_002_000)));

    client.shutdown().await;
}

#[tokio::test]
async fn sync_and_control_apply_to_mirrored_track() {
    let (transport, relay_tx, _sent) = ChannelTransport::new();
    let (mut client, mut events) = RelayClient::start(transport, RelayClientConfig::default());
    expect_connected(&mut events).await;

    client.join_room("r1").unwrap();
    settle().await;

    relay_tx.send(ok(play_song_json("abc", 5_000))).unwrap();
    relay_tx
        .send(ok(sync_state_json("r1", "paused", 42.0)))
        .unwrap();
    for _ in 0..2 {
        events.recv().await.expect("event");
    }
    let now = client.now_playing().await.expect("track mirrored");
    assert_eq!(now.state, PlaybackState::Paused);
    assert_eq!(now.time, 42.0);

    relay_tx
        .send(ok(control_action_json(
            json!({"room": "r1", "action": "seek", "time": 90.0}),
        )))
        .unwrap();
    relay_tx
        .send(ok(control_action_json(json!({"room": "r1", "action": "play"}))))
        .unwrap();
    for _ in 0..2 {
        events.recv().await.expect("event");
    }
    let now = client.now_playing().await.expect("track mirrored");
    assert_eq!(now.state, PlaybackState::Playing);
    assert_eq!(now.time, 90.0);
    assert_eq!(now.video_id, "abc");

    client.shutdown().await;
}

#[tokio::test]
async fn updates_for_other_rooms_or_malformed_are_not_mirrored() {
    let (transport, relay_tx, _sent) = ChannelTransport::new();
    let (mut client, mut events) = RelayClient::start(transport, RelayClientConfig::default());
    expect_connected(&mut events).await;

    client.join_room("r1").unwrap();
    settle().await;

    relay_tx.send(ok(play_song_json("abc", 5_000))).unwrap();
    relay_tx
        .send(ok(sync_state_json("r2", "paused", 42.0)))
        .unwrap();
    relay_tx
        .send(ok(control_action_json(json!({"room": "r1", "action": "seek"}))))
        .unwrap();
    relay_tx
        .send(ok(control_action_json(
            json!({"room": "r1", "action": "rewind"}),
        )))
        .unwrap();
    for _ in 0..4 {
        events.recv().await.expect("event");
    }

    assert_eq!(client.now_playing().await, Some(track("abc", 5_000)));
    client.shutdown().await;
}

#[tokio::test]
async fn room_created_for_current_room_clears_now_playing() {
    let (transport, relay_tx, _sent) = ChannelTransport::new();
    let (mut client, mut events) = RelayClient::start(transport, RelayClientConfig::default());
    expect_connected(&mut events).await;

    client.join_room("r1").unwrap();
    settle().await;

    relay_tx.send(ok(play_song_json("abc", 5_000))).unwrap();
    relay_tx.send(ok(room_created_json("other", 1))).unwrap();
    events.recv().await.expect("PlaySong");
    events.recv().await.expect("RoomCreated");
    assert_eq!(client.now_playing().await, Some(track("abc", 5_000)));

    relay_tx.send(ok(room_created_json("r1", 2))).unwrap();
    events.recv().await.expect("RoomCreated");
    assert!(client.now_playing().await.is_none());

    client.shutdown().await;
}

#[tokio::test]
async fn raw_payloads_reach_the_consumer_unchanged() {
    let odd = json!({"room": "r1", "action": "rewind", "speed": 2});
    let (mut client, mut events, _sent, _closed) =
        start_client(vec![ok(control_action_json(odd.clone()))]);
    expect_connected(&mut events).await;

    assert_eq!(events.recv().await.unwrap(), RelayEvent::ControlAction(odd));
    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Lifecycle
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn receive_error_disconnects_with_reason() {
    let (client, mut events, _sent, _closed) =
        start_client(vec![Some(Err(RelayError::TransportReceive("boom".into())))]);
    expect_connected(&mut events).await;

    let ev = events.recv().await.unwrap();
    let RelayEvent::Disconnected { reason: Some(reason) } = ev else {
        panic!("expected Disconnected with a reason, got {ev:?}");
    };
    assert!(reason.contains("boom"), "reason was {reason}");
    assert!(!client.is_connected());
    assert!(matches!(
        client.create_room("r1"),
        Err(RelayError::NotConnected)
    ));
}

#[tokio::test]
async fn dropping_the_client_ends_the_event_stream() {
    let (client, mut events, _sent, _closed) = start_client(vec![]);
    expect_connected(&mut events).await;
    drop(client);

    let next = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("event stream should end after drop");
    assert!(next.is_none());
}

#[tokio::test]
async fn full_event_channel_drops_events_but_keeps_disconnected() {
    let (transport, _sent, _closed) = MockTransport::new(vec![
        ok(room_joined_json("r1", 2)),
        ok(room_joined_json("r1", 3)),
        ok(room_joined_json("r1", 4)),
        None,
    ]);
    let config = RelayClientConfig::default().with_event_channel_capacity(1);
    let (client, mut events) = RelayClient::start(transport, config);

    // Let the loop run ahead while nobody reads.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut received = Vec::new();
    while let Some(ev) = events.recv().await {
        received.push(ev);
    }
    assert_eq!(received.first(), Some(&RelayEvent::Connected));
    assert_eq!(
        received.last(),
        Some(&RelayEvent::Disconnected { reason: None })
    );
    assert!(received.len() < 6, "some events should have been dropped");
    assert!(!client.is_connected());
}
