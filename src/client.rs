//! Async client for the watch-party relay.
//!
//! [`RelayClient`] is a thin handle that talks to a background transport loop
//! over an unbounded MPSC channel. Events arrive on the bounded channel
//! returned from [`RelayClient::start`].
//!
//! The loop keeps a local mirror of the current room's now-playing record.
//! `play-song` replaces it, `sync-state` and `control-action` are applied with
//! the same rules the relay uses, whether they come from a peer or from this
//! client. Creating a room, joining a different one, or a `room-created` for
//! our room clears it.
//!
//! # Example
//!
//! ```rust,ignore
//! let transport = WebSocketTransport::connect("ws://localhost:3000/ws").await?;
//! let (mut client, mut events) = RelayClient::start(transport, RelayClientConfig::default());
//!
//! client.join_room("movie-night")?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         RelayEvent::PlaySong(track) => schedule(track.preload_delay(now_ms())),
//!         RelayEvent::Disconnected { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn};

use crate::coordinator::{Clock, SystemClock};
use crate::error::{RelayError, Result};
use crate::event::RelayEvent;
use crate::protocol::{
    control_action_payload, payload_room, sync_state_payload, ClientMessage, ControlAction,
    PlaySongRequest, RoomId, RoomState, ServerMessage, SyncStateUpdate,
};
use crate::transport::Transport;

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`RelayClient`].
///
/// ```
/// use watch_party_relay::client::RelayClientConfig;
/// use std::time::Duration;
///
/// let config = RelayClientConfig::default()
///     .with_event_channel_capacity(512)
///     .with_shutdown_timeout(Duration::from_secs(5));
/// assert_eq!(config.event_channel_capacity, 512);
/// ```
#[derive(Debug, Clone)]
pub struct RelayClientConfig {
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer falls behind, events are dropped (with a warning
    /// logged) rather than stalling the transport loop. `Disconnected` is
    /// always delivered.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// How long [`RelayClient::shutdown`] waits for the loop to close the
    /// transport before aborting it. Defaults to **1 second**.
    pub shutdown_timeout: Duration,
}

impl Default for RelayClientConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl RelayClientConfig {
    /// Set the capacity of the bounded event channel. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the timeout for the graceful shutdown.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

// ── Shared state ────────────────────────────────────────────────────

struct ClientState {
    connected: AtomicBool,
    room: Mutex<Option<RoomId>>,
    now_playing: Mutex<Option<RoomState>>,
}

impl ClientState {
    fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            room: Mutex::new(None),
            now_playing: Mutex::new(None),
        }
    }
}

// ── Client handle ───────────────────────────────────────────────────

/// Async client handle for the watch-party relay.
///
/// Methods queue a [`ClientMessage`] for the transport loop and return
/// immediately; nothing waits for the relay.
pub struct RelayClient {
    cmd_tx: mpsc::UnboundedSender<ClientMessage>,
    state: Arc<ClientState>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl RelayClient {
    /// Start the transport loop and return a handle plus the event receiver.
    ///
    /// The receiver yields [`RelayEvent::Connected`] first and
    /// [`RelayEvent::Disconnected`] last.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(
        transport: impl Transport,
        config: RelayClientConfig,
    ) -> (Self, mpsc::Receiver<RelayEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<ClientMessage>();
        // tokio panics on a zero-capacity channel.
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<RelayEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let state = Arc::new(ClientState::new());

        let task = tokio::spawn(transport_loop(
            transport,
            cmd_rx,
            event_tx,
            Arc::clone(&state),
            shutdown_rx,
        ));

        let client = Self {
            cmd_tx,
            state,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        };

        (client, event_rx)
    }

    // ── Public API methods ──────────────────────────────────────────

    /// Create (and join) a room, clearing whatever it was playing.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NotConnected`] if the transport has closed.
    pub fn create_room(&self, room: impl Into<RoomId>) -> Result<()> {
        self.send(ClientMessage::CreateRoom(room.into()))
    }

    /// Join a room. If it has a track, a [`RelayEvent::PlaySong`] follows the
    /// [`RelayEvent::RoomJoined`].
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NotConnected`] if the transport has closed.
    pub fn join_room(&self, room: impl Into<RoomId>) -> Result<()> {
        self.send(ClientMessage::JoinRoom(room.into()))
    }

    /// Report where local playback is.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NotConnected`] if the transport has closed.
    pub fn sync_state(&self, room: &str, update: SyncStateUpdate) -> Result<()> {
        self.send(ClientMessage::SyncState(sync_state_payload(room, update)))
    }

    /// Start a new track for everyone else in the room.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NotConnected`] if the transport has closed.
    pub fn play_song(
        &self,
        room: impl Into<RoomId>,
        video_id: impl Into<String>,
        title: impl Into<String>,
        channel: impl Into<String>,
    ) -> Result<()> {
        self.send(ClientMessage::PlaySong(PlaySongRequest {
            room: room.into(),
            video_id: video_id.into(),
            title: title.into(),
            channel: channel.into(),
        }))
    }

    /// Seek, pause or play for everyone else in the room.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NotConnected`] if the transport has closed.
    pub fn control(&self, room: &str, action: ControlAction) -> Result<()> {
        self.send(ClientMessage::ControlAction(control_action_payload(
            room, action,
        )))
    }

    /// Close the transport and stop the background task.
    ///
    /// The event receiver yields `None` once the loop has exited.
    pub async fn shutdown(&mut self) {
        debug!("RelayClient: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("transport loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("transport loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("transport loop aborted: {join_err}");
                    }
                }
            }
        }

        self.state.connected.store(false, Ordering::Release);
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Returns `true` if the transport is believed to be connected.
    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Acquire)
    }

    /// The room most recently created or joined through this client.
    pub async fn current_room(&self) -> Option<RoomId> {
        self.state.room.lock().await.clone()
    }

    /// Local mirror of the current room's now-playing record.
    ///
    /// Built from relay events plus this client's own `play_song`,
    /// `sync_state` and `control` calls for the current room. Cleared on
    /// `create_room` and when joining a different room. After our own
    /// `play_song`, `start_at` is a local estimate until a peer's track
    /// replaces it.
    pub async fn now_playing(&self) -> Option<RoomState> {
        self.state.now_playing.lock().await.clone()
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn send(&self, msg: ClientMessage) -> Result<()> {
        if !self.state.connected.load(Ordering::Acquire) {
            return Err(RelayError::NotConnected);
        }
        self.cmd_tx.send(msg).map_err(|_| RelayError::NotConnected)
    }
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("connected", &self.is_connected())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        // No executor to drive a graceful close from a synchronous drop.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Transport loop ──────────────────────────────────────────────────

/// Multiplex outgoing commands, shutdown and incoming frames.
///
/// Exits when the command channel closes, on shutdown, when the relay closes
/// the connection, or on a transport error.
async fn transport_loop(
    mut transport: impl Transport,
    mut cmd_rx: mpsc::UnboundedReceiver<ClientMessage>,
    event_tx: mpsc::Sender<RelayEvent>,
    state: Arc<ClientState>,
    mut shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) {
    debug!("transport loop started");

    emit_event(&event_tx, RelayEvent::Connected).await;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(msg) = cmd else {
                    debug!("command channel closed, shutting down transport loop");
                    let _ = transport.close().await;
                    emit_disconnected(&event_tx, &state, Some("client shut down".into())).await;
                    break;
                };
                debug!(event = msg.event_name(), "sending client message");
                match serde_json::to_string(&msg) {
                    Ok(json) => {
                        if let Err(e) = transport.send(json).await {
                            error!("transport send error: {e}");
                            emit_disconnected(
                                &event_tx,
                                &state,
                                Some(format!("transport send error: {e}")),
                            ).await;
                            break;
                        }
                        track_outgoing(&state, &msg).await;
                    }
                    Err(e) => {
                        error!("failed to serialize ClientMessage: {e}");
                    }
                }
            }

            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                let _ = transport.close().await;
                emit_disconnected(&event_tx, &state, Some("client shut down".into())).await;
                break;
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(server_msg) => {
                            track_incoming(&state, &server_msg).await;
                            emit_event(&event_tx, RelayEvent::from(server_msg)).await;
                        }
                        Err(e) => {
                            warn!("failed to deserialize relay message: {e}; raw: {text}");
                        }
                    },
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        emit_disconnected(
                            &event_tx,
                            &state,
                            Some(format!("transport receive error: {e}")),
                        ).await;
                        break;
                    }
                    None => {
                        debug!("transport closed by relay");
                        emit_disconnected(&event_tx, &state, None).await;
                        break;
                    }
                }
            }
        }
    }

    debug!("transport loop exited");
}

/// Track the room we asked to be in, and apply our own playback changes to
/// the mirror: the relay never echoes them back to the sender.
async fn track_outgoing(state: &ClientState, msg: &ClientMessage) {
    match msg {
        ClientMessage::CreateRoom(room) => {
            // The relay resets the room's record on create.
            *state.room.lock().await = Some(room.clone());
            *state.now_playing.lock().await = None;
        }
        ClientMessage::JoinRoom(room) => {
            let mut current = state.room.lock().await;
            if current.as_deref() != Some(room.as_str()) {
                debug!(room = %room, "state: switched rooms");
                *state.now_playing.lock().await = None;
            }
            *current = Some(room.clone());
        }
        ClientMessage::PlaySong(request) => {
            if state.room.lock().await.as_deref() == Some(request.room.as_str()) {
                // startAt is the relay's to set; this is a local estimate.
                let track = RoomState::start(request, SystemClock.now_millis());
                *state.now_playing.lock().await = Some(track);
            }
        }
        ClientMessage::SyncState(payload) => mirror_sync(state, payload).await,
        ClientMessage::ControlAction(payload) => mirror_control(state, payload).await,
    }
}

/// Keep the now-playing mirror in step with what the relay tells us.
async fn track_incoming(state: &ClientState, msg: &ServerMessage) {
    match msg {
        ServerMessage::PlaySong(track) => {
            debug!(video_id = %track.video_id, "state: now playing");
            *state.now_playing.lock().await = Some(track.clone());
        }
        ServerMessage::SyncState(payload) => mirror_sync(state, payload).await,
        ServerMessage::ControlAction(payload) => mirror_control(state, payload).await,
        ServerMessage::RoomCreated(created) => {
            if state.room.lock().await.as_deref() == Some(created.room_id.as_str()) {
                debug!(room = %created.room_id, "state: room reset");
                *state.now_playing.lock().await = None;
            }
        }
        ServerMessage::RoomJoined(_) | ServerMessage::UserLeft(_) => {}
    }
}

async fn mirror_sync(state: &ClientState, payload: &serde_json::Value) {
    if !in_current_room(state, payload).await {
        return;
    }
    if let (Some(track), Some(update)) = (
        state.now_playing.lock().await.as_mut(),
        SyncStateUpdate::from_payload(payload),
    ) {
        track.apply_sync(&update);
    }
}

async fn mirror_control(state: &ClientState, payload: &serde_json::Value) {
    if !in_current_room(state, payload).await {
        return;
    }
    if let (Some(track), Some(action)) = (
        state.now_playing.lock().await.as_mut(),
        ControlAction::from_payload(payload),
    ) {
        track.apply_control(action);
    }
}

async fn in_current_room(state: &ClientState, payload: &serde_json::Value) -> bool {
    let room = state.room.lock().await;
    room.is_some() && room.as_deref() == payload_room(payload)
}

/// Emit an event, dropping it with a warning if the channel is full.
async fn emit_event(event_tx: &mpsc::Sender<RelayEvent>, event: RelayEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!("event channel full, dropping event: {dropped:?}");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

/// Emit [`RelayEvent::Disconnected`] and mark the client disconnected.
///
/// Awaits channel capacity instead of dropping: this is always the last event.
async fn emit_disconnected(
    event_tx: &mpsc::Sender<RelayEvent>,
    state: &ClientState,
    reason: Option<String>,
) {
    state.connected.store(false, Ordering::Release);
    if event_tx
        .send(RelayEvent::Disconnected { reason })
        .await
        .is_err()
    {
        debug!("event channel closed, receiver dropped");
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
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Records sent frames and replays scripted incoming ones.
    struct MockTransport {
        incoming: VecDeque<Option<std::result::Result<String, RelayError>>>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, message: String) -> std::result::Result<(), RelayError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, RelayError>> {
            match self.incoming.pop_front() {
                Some(item) => item,
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> std::result::Result<(), RelayError> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    fn start(
        incoming: Vec<Option<std::result::Result<String, RelayError>>>,
    ) -> (
        RelayClient,
        mpsc::Receiver<RelayEvent>,
        Arc<StdMutex<Vec<String>>>,
        Arc<AtomicBool>,
    ) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = MockTransport {
            incoming: VecDeque::from(incoming),
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        let (client, events) = RelayClient::start(transport, RelayClientConfig::default());
        (client, events, sent, closed)
    }

    #[tokio::test]
    async fn first_event_is_connected() {
        let (mut client, mut events, _sent, _closed) = start(vec![]);
        assert_eq!(events.recv().await, Some(RelayEvent::Connected));
        assert!(client.is_connected());
        client.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_closes_transport_and_emits_disconnected() {
        let (mut client, mut events, _sent, closed) = start(vec![]);
        let _ = events.recv().await; // Connected

        client.shutdown().await;

        assert_eq!(
            events.recv().await,
            Some(RelayEvent::Disconnected {
                reason: Some("client shut down".into())
            })
        );
        assert!(events.recv().await.is_none());
        assert!(closed.load(Ordering::Relaxed));
        assert!(!client.is_connected());
        assert!(matches!(
            client.join_room("r1"),
            Err(RelayError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn join_room_sends_frame_and_tracks_room() {
        let (mut client, mut events, sent, _closed) = start(vec![]);
        let _ = events.recv().await; // Connected

        client.join_room("r1").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(
            sent.lock().unwrap().as_slice(),
            [r#"{"event":"join-room","data":"r1"}"#.to_string()]
        );
        assert_eq!(client.current_room().await.as_deref(), Some("r1"));
        client.shutdown().await;
    }

    #[tokio::test]
    async fn server_close_emits_disconnected_without_reason() {
        let (client, mut events, _sent, _closed) = start(vec![None]);
        let _ = events.recv().await; // Connected
        assert_eq!(
            events.recv().await,
            Some(RelayEvent::Disconnected { reason: None })
        );
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn undecodable_frames_are_skipped() {
        let (mut client, mut events, _sent, _closed) = start(vec![
            Some(Ok("not json".into())),
            Some(Ok(r#"{"event":"user-left","data":{"roomId":"r1","users":1}}"#.into())),
        ]);
        let _ = events.recv().await; // Connected
        assert_eq!(
            events.recv().await,
            Some(RelayEvent::UserLeft {
                room_id: "r1".into(),
                users: 1
            })
        );
        client.shutdown().await;
    }
}
