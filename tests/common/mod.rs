#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for the relay integration tests.
//!
//! Provides a scripted [`MockTransport`], a test-driven [`ChannelTransport`]
//! and helpers that build relay messages as JSON strings.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use watch_party_relay::protocol::{PlaybackState, RoomMembership, RoomState, ServerMessage};
use watch_party_relay::{RelayError, Transport};

// ── MockTransport ───────────────────────────────────────────────────

/// Scripted relay responses are consumed in order by `recv()`; everything the
/// client sends is recorded in `sent`.
pub struct MockTransport {
    incoming: VecDeque<Option<Result<String, RelayError>>>,
    pub sent: Arc<StdMutex<Vec<String>>>,
    pub closed: Arc<AtomicBool>,
}

impl MockTransport {
    /// Returns the transport plus shared handles for inspecting sent frames
    /// and whether close was called.
    pub fn new(
        incoming: Vec<Option<Result<String, RelayError>>>,
    ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            incoming: VecDeque::from(incoming),
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        (transport, sent, closed)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), RelayError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, RelayError>> {
        if let Some(item) = self.incoming.pop_front() {
            item
        } else {
            // Out of script: stay open until shutdown.
            std::future::pending().await
        }
    }

    async fn close(&mut self) -> Result<(), RelayError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── ChannelTransport ────────────────────────────────────────────────

/// Like [`MockTransport`], but relay frames are pushed by the test while the
/// client runs, so they can be ordered after client actions.
pub struct ChannelTransport {
    incoming: mpsc::UnboundedReceiver<Option<Result<String, RelayError>>>,
    pub sent: Arc<StdMutex<Vec<String>>>,
}

impl ChannelTransport {
    pub fn new() -> (
        Self,
        mpsc::UnboundedSender<Option<Result<String, RelayError>>>,
        Arc<StdMutex<Vec<String>>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let transport = Self {
            incoming: rx,
            sent: Arc::clone(&sent),
        };
        (transport, tx, sent)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&mut self, message: String) -> Result<(), RelayError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, RelayError>> {
        match self.incoming.recv().await {
            Some(item) => item,
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), RelayError> {
        Ok(())
    }
}

// ── Message builders ────────────────────────────────────────────────

pub fn to_json(msg: &ServerMessage) -> String {
    serde_json::to_string(msg).unwrap()
}

pub fn room_created_json(room: &str, users: usize) -> String {
    to_json(&ServerMessage::RoomCreated(RoomMembership {
        room_id: room.into(),
        users,
    }))
}

pub fn room_joined_json(room: &str, users: usize) -> String {
    to_json(&ServerMessage::RoomJoined(RoomMembership {
        room_id: room.into(),
        users,
    }))
}

pub fn user_left_json(room: &str, users: usize) -> String {
    to_json(&ServerMessage::UserLeft(RoomMembership {
        room_id: room.into(),
        users,
    }))
}

pub fn track(video_id: &str, start_at: u64) -> RoomState {
    RoomState {
        video_id: video_id.into(),
        title: format!("Title of {video_id}"),
        channel: "Some Channel".into(),
        state: PlaybackState::Playing,
        time: 0.0,
        start_at,
    }
}

pub fn play_song_json(video_id: &str, start_at: u64) -> String {
    to_json(&ServerMessage::PlaySong(track(video_id, start_at)))
}

pub fn sync_state_json(room: &str, state: &str, time: f64) -> String {
    to_json(&ServerMessage::SyncState(serde_json::json!({
        "room": room,
        "state": state,
        "time": time,
    })))
}

pub fn control_action_json(payload: serde_json::Value) -> String {
    to_json(&ServerMessage::ControlAction(payload))
}

/// Wrap a JSON string as a successful scripted `recv()` result.
pub fn ok(json: String) -> Option<Result<String, RelayError>> {
    Some(Ok(json))
}
