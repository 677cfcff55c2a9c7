//! The relay actor.
//!
//! A single background task owns the [`SessionCoordinator`] and the
//! [`RoomRegistry`]. Socket tasks talk to it through a cloneable
//! [`RelayHandle`] over a bounded command channel, so every event is read,
//! applied and fanned out before the next one is looked at. That ordering is
//! what lets the room state store go without locks. When the queue is full,
//! senders wait for room: a flooding socket slows its own reader, and no
//! command is ever dropped.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut relay = Relay::start(&RelayConfig::default());
//! let handle = relay.handle();
//!
//! let (id, mut outbound) = handle.connect().await?;
//! handle.dispatch(id, ClientMessage::CreateRoom("r1".into())).await?;
//! let frame = outbound.recv().await; // {"event":"room-created",...}
//!
//! relay.shutdown().await;
//! ```

use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::coordinator::{Clock, SessionCoordinator, SystemClock};
use crate::error::{RelayError, Result};
use crate::membership::{Membership, RoomRegistry};
use crate::protocol::{ClientMessage, ConnectionId, RoomId, RoomState};

enum Command {
    Connect {
        connection: ConnectionId,
        outbound: mpsc::Sender<String>,
    },
    Message {
        connection: ConnectionId,
        message: ClientMessage,
    },
    Disconnect {
        connection: ConnectionId,
    },
    RoomState {
        room: RoomId,
        reply: oneshot::Sender<Option<RoomState>>,
    },
    RoomSize {
        room: RoomId,
        reply: oneshot::Sender<usize>,
    },
}

// ── Handle ──────────────────────────────────────────────────────────

/// Cloneable handle for submitting events to the relay actor.
///
/// Methods return once the command is queued, waiting only while the queue
/// is full. The inspection methods also await the actor's answer.
#[derive(Clone)]
pub struct RelayHandle {
    cmd_tx: mpsc::Sender<Command>,
    outbound_capacity: usize,
}

impl RelayHandle {
    /// Register a new connection.
    ///
    /// Returns the id assigned to it and the queue of serialized frames to
    /// write to its socket. The queue closes when the connection is
    /// disconnected or the relay stops.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::RelayStopped`] if the actor has exited.
    pub async fn connect(&self) -> Result<(ConnectionId, mpsc::Receiver<String>)> {
        let connection = Uuid::new_v4();
        let (outbound, outbound_rx) = mpsc::channel(self.outbound_capacity);
        self.send(Command::Connect {
            connection,
            outbound,
        })
        .await?;
        Ok((connection, outbound_rx))
    }

    /// Submit an inbound event from `connection`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::RelayStopped`] if the actor has exited.
    pub async fn dispatch(&self, connection: ConnectionId, message: ClientMessage) -> Result<()> {
        self.send(Command::Message {
            connection,
            message,
        })
        .await
    }

    /// Tell the relay `connection` is gone.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::RelayStopped`] if the actor has exited.
    pub async fn disconnect(&self, connection: ConnectionId) -> Result<()> {
        self.send(Command::Disconnect { connection }).await
    }

    /// Snapshot of a room's now-playing record.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::RelayStopped`] if the actor has exited.
    pub async fn room_state(&self, room: impl Into<RoomId>) -> Result<Option<RoomState>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::RoomState {
            room: room.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| RelayError::RelayStopped)
    }

    /// Number of connections currently in a room.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::RelayStopped`] if the actor has exited.
    pub async fn room_size(&self, room: impl Into<RoomId>) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::RoomSize {
            room: room.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| RelayError::RelayStopped)
    }

    async fn send(&self, command: Command) -> Result<()> {
        match self.cmd_tx.try_send(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(command)) => {
                warn!(
                    capacity = self.cmd_tx.max_capacity(),
                    "relay command queue full, waiting"
                );
                self.cmd_tx
                    .send(command)
                    .await
                    .map_err(|_| RelayError::RelayStopped)
            }
            Err(TrySendError::Closed(_)) => Err(RelayError::RelayStopped),
        }
    }
}

impl std::fmt::Debug for RelayHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayHandle")
            .field("running", &!self.cmd_tx.is_closed())
            .finish()
    }
}

// ── Relay ───────────────────────────────────────────────────────────

/// Owner of the relay actor task.
///
/// Dropping a `Relay` aborts the actor; call [`shutdown`](Relay::shutdown) to
/// stop it gracefully.
pub struct Relay {
    handle: RelayHandle,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl Relay {
    /// Spawn the relay actor with an empty store and the system clock.
    pub fn start(config: &RelayConfig) -> Self {
        Self::with_coordinator(SessionCoordinator::<SystemClock>::new(), config)
    }

    /// Spawn the relay actor around an existing coordinator.
    pub fn with_coordinator<C: Clock>(
        coordinator: SessionCoordinator<C>,
        config: &RelayConfig,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(relay_loop(coordinator, cmd_rx, shutdown_rx));

        Self {
            handle: RelayHandle {
                cmd_tx,
                outbound_capacity: config.outbound_capacity.max(1),
            },
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    /// A new handle to the running actor.
    pub fn handle(&self) -> RelayHandle {
        self.handle.clone()
    }

    /// Stop the actor, closing every connection's outbound queue.
    ///
    /// Waits up to the configured shutdown timeout, then aborts the task.
    pub async fn shutdown(&mut self) {
        debug!("relay: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("relay loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("relay loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("relay loop aborted: {join_err}");
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("has_task", &self.task.is_some())
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish()
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Actor loop ──────────────────────────────────────────────────────

/// Apply commands strictly in arrival order until shutdown or until every
/// handle has been dropped.
async fn relay_loop<C: Clock>(
    mut coordinator: SessionCoordinator<C>,
    mut cmd_rx: mpsc::Receiver<Command>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!("relay loop started");
    let mut registry = RoomRegistry::new();

    loop {
        tokio::select! {
            command = cmd_rx.recv() => {
                match command {
                    Some(command) => apply(&mut coordinator, &mut registry, command),
                    None => {
                        debug!("all relay handles dropped, shutting down relay loop");
                        break;
                    }
                }
            }

            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                break;
            }
        }
    }

    info!(
        connections = registry.connection_count(),
        rooms = coordinator.store().len(),
        "relay stopped"
    );
}

fn apply<C: Clock>(
    coordinator: &mut SessionCoordinator<C>,
    registry: &mut RoomRegistry,
    command: Command,
) {
    match command {
        Command::Connect {
            connection,
            outbound,
        } => {
            registry.register(connection, outbound);
            debug!(%connection, "connection registered");
        }
        Command::Message {
            connection,
            message,
        } => {
            if !registry.is_registered(connection) {
                debug!(%connection, event = message.event_name(), "event from unknown connection");
                return;
            }
            debug!(%connection, event = message.event_name(), "handling event");
            for dispatch in coordinator.handle(connection, message, registry) {
                registry.deliver(&dispatch);
            }
        }
        Command::Disconnect { connection } => {
            for dispatch in coordinator.disconnect(connection, registry) {
                registry.deliver(&dispatch);
            }
            registry.unregister(connection);
            debug!(%connection, "connection unregistered");
        }
        Command::RoomState { room, reply } => {
            let _ = reply.send(coordinator.store().get(&room).cloned());
        }
        Command::RoomSize { room, reply } => {
            let _ = reply.send(registry.room_size(&room));
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
    use crate::protocol::{PlaySongRequest, PlaybackState, RoomMembership, ServerMessage};
    use serde_json::json;

    async fn next(rx: &mut mpsc::Receiver<String>) -> ServerMessage {
        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("outbound queue closed");
        serde_json::from_str(&frame).unwrap()
    }

    fn nothing_queued(rx: &mut mpsc::Receiver<String>) -> bool {
        matches!(rx.try_recv(), Err(mpsc::error::TryRecvError::Empty))
    }

    #[tokio::test]
    async fn create_room_is_echoed_to_creator() {
        let mut relay = Relay::start(&RelayConfig::default());
        let handle = relay.handle();

        let (a, mut ra) = handle.connect().await.unwrap();
        handle
            .dispatch(a, ClientMessage::CreateRoom("r1".into()))
            .await
            .unwrap();

        assert_eq!(
            next(&mut ra).await,
            ServerMessage::RoomCreated(RoomMembership {
                room_id: "r1".into(),
                users: 1
            })
        );
        relay.shutdown().await;
    }

    #[tokio::test]
    async fn late_joiner_receives_current_track_after_membership() {
        let mut relay = Relay::start(&RelayConfig::default());
        let handle = relay.handle();

        let (a, mut ra) = handle.connect().await.unwrap();
        handle
            .dispatch(a, ClientMessage::CreateRoom("r1".into()))
            .await
            .unwrap();
        handle
            .dispatch(
                a,
                ClientMessage::PlaySong(PlaySongRequest {
                    room: "r1".into(),
                    video_id: "v1".into(),
                    title: "T".into(),
                    channel: "C".into(),
                }),
            )
            .await
            .unwrap();
        let _ = next(&mut ra).await; // room-created

        let (b, mut rb) = handle.connect().await.unwrap();
        handle
            .dispatch(b, ClientMessage::JoinRoom("r1".into()))
            .await
            .unwrap();

        let joined = ServerMessage::RoomJoined(RoomMembership {
            room_id: "r1".into(),
            users: 2,
        });
        assert_eq!(next(&mut rb).await, joined);
        match next(&mut rb).await {
            ServerMessage::PlaySong(state) => assert_eq!(state.video_id, "v1"),
            other => panic!("expected play-song, got {other:?}"),
        }
        assert_eq!(next(&mut ra).await, joined);
        assert!(nothing_queued(&mut ra));

        relay.shutdown().await;
    }

    #[tokio::test]
    async fn disconnect_notifies_remaining_members() {
        let mut relay = Relay::start(&RelayConfig::default());
        let handle = relay.handle();

        let (a, mut ra) = handle.connect().await.unwrap();
        let (b, mut rb) = handle.connect().await.unwrap();
        handle
            .dispatch(a, ClientMessage::CreateRoom("r1".into()))
            .await
            .unwrap();
        handle
            .dispatch(b, ClientMessage::JoinRoom("r1".into()))
            .await
            .unwrap();
        let _ = next(&mut ra).await; // room-created
        let _ = next(&mut ra).await; // room-joined
        let _ = next(&mut rb).await; // room-joined

        handle.disconnect(b).await.unwrap();

        assert_eq!(
            next(&mut ra).await,
            ServerMessage::UserLeft(RoomMembership {
                room_id: "r1".into(),
                users: 1
            })
        );
        // b's queue closes once it is unregistered.
        assert!(rb.recv().await.is_none());
        assert_eq!(handle.room_size("r1").await.unwrap(), 1);

        relay.shutdown().await;
    }

    #[tokio::test]
    async fn control_action_mutates_state_and_reaches_peers_only() {
        let mut relay = Relay::start(&RelayConfig::default());
        let handle = relay.handle();

        let (a, mut ra) = handle.connect().await.unwrap();
        let (b, mut rb) = handle.connect().await.unwrap();
        handle
            .dispatch(a, ClientMessage::CreateRoom("r1".into()))
            .await
            .unwrap();
        handle
            .dispatch(b, ClientMessage::JoinRoom("r1".into()))
            .await
            .unwrap();
        handle
            .dispatch(
                a,
                ClientMessage::PlaySong(PlaySongRequest {
                    room: "r1".into(),
                    video_id: "v1".into(),
                    title: String::new(),
                    channel: String::new(),
                }),
            )
            .await
            .unwrap();

        let pause = json!({"room": "r1", "action": "pause"});
        handle
            .dispatch(b, ClientMessage::ControlAction(pause.clone()))
            .await
            .unwrap();

        let state = handle.room_state("r1").await.unwrap().unwrap();
        assert_eq!(state.state, PlaybackState::Paused);

        let _ = next(&mut ra).await; // room-created
        let _ = next(&mut ra).await; // room-joined
        assert_eq!(next(&mut ra).await, ServerMessage::ControlAction(pause));
        assert!(nothing_queued(&mut ra));

        let _ = next(&mut rb).await; // room-joined
        assert!(matches!(next(&mut rb).await, ServerMessage::PlaySong(_)));
        assert!(nothing_queued(&mut rb));

        relay.shutdown().await;
    }

    #[tokio::test]
    async fn events_from_unknown_connections_are_ignored() {
        let mut relay = Relay::start(&RelayConfig::default());
        let handle = relay.handle();

        handle
            .dispatch(Uuid::new_v4(), ClientMessage::CreateRoom("r1".into()))
            .await
            .unwrap();

        assert_eq!(handle.room_size("r1").await.unwrap(), 0);
        relay.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_closes_queues_and_rejects_commands() {
        let mut relay = Relay::start(&RelayConfig::default());
        let handle = relay.handle();
        let (_a, mut ra) = handle.connect().await.unwrap();

        relay.shutdown().await;

        assert!(ra.recv().await.is_none());
        assert!(matches!(handle.connect().await, Err(RelayError::RelayStopped)));
        assert!(matches!(
            handle.room_state("r1").await,
            Err(RelayError::RelayStopped)
        ));
    }

    #[tokio::test]
    async fn full_command_queue_waits_instead_of_dropping() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(1);
        let handle = RelayHandle {
            cmd_tx,
            outbound_capacity: 1,
        };
        let a = Uuid::new_v4();

        handle
            .dispatch(a, ClientMessage::JoinRoom("r1".into()))
            .await
            .unwrap();

        let second = {
            let handle = handle.clone();
            tokio::spawn(async move {
                handle
                    .dispatch(a, ClientMessage::JoinRoom("r2".into()))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!second.is_finished(), "send should wait for room");

        for expected in ["r1", "r2"] {
            match cmd_rx.recv().await {
                Some(Command::Message {
                    message: ClientMessage::JoinRoom(room),
                    ..
                }) => assert_eq!(room, expected),
                _ => panic!("expected join-room {expected}"),
            }
        }
        assert!(second.await.unwrap().is_ok());

        drop(cmd_rx);
        assert!(matches!(
            handle.disconnect(a).await,
            Err(RelayError::RelayStopped)
        ));
    }
}
