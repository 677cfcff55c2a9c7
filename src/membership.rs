//! Room membership and fan-out.
//!
//! [`Membership`] is the narrow view of connection bookkeeping the
//! [`SessionCoordinator`](crate::coordinator::SessionCoordinator) needs.
//! [`RoomRegistry`] implements it on top of per-connection outbound queues and
//! delivers the coordinator's [`Dispatch`]es to the right sockets.

use std::collections::{BTreeSet, HashMap, HashSet};

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::protocol::{ConnectionId, RoomId, ServerMessage};

/// Room membership operations used by the session coordinator.
pub trait Membership {
    /// Add `connection` to `room`. Joining a room twice is a no-op.
    fn join(&mut self, connection: ConnectionId, room: &str);

    /// Number of connections currently in `room`.
    fn room_size(&self, room: &str) -> usize;

    /// Remove `connection` from every room it is in and return those rooms.
    fn leave_all(&mut self, connection: ConnectionId) -> Vec<RoomId>;
}

/// Who receives a [`Dispatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Every member of the room.
    Room(RoomId),
    /// Every member of the room except one connection (usually the sender).
    RoomExcept(RoomId, ConnectionId),
    /// A single connection.
    Connection(ConnectionId),
}

/// One outbound message and its audience.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub audience: Audience,
    pub message: ServerMessage,
}

impl Dispatch {
    pub fn to_room(room: impl Into<RoomId>, message: ServerMessage) -> Self {
        Self {
            audience: Audience::Room(room.into()),
            message,
        }
    }

    pub fn to_room_except(
        room: impl Into<RoomId>,
        sender: ConnectionId,
        message: ServerMessage,
    ) -> Self {
        Self {
            audience: Audience::RoomExcept(room.into(), sender),
            message,
        }
    }

    pub fn to_connection(connection: ConnectionId, message: ServerMessage) -> Self {
        Self {
            audience: Audience::Connection(connection),
            message,
        }
    }
}

struct Peer {
    outbound: mpsc::Sender<String>,
    rooms: BTreeSet<RoomId>,
}

/// Connection registry with room membership and fan-out.
#[derive(Default)]
pub struct RoomRegistry {
    peers: HashMap<ConnectionId, Peer>,
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
}

impl RoomRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and the queue its socket writer drains.
    ///
    /// Registering an id twice replaces the old queue and forgets its rooms.
    pub fn register(&mut self, connection: ConnectionId, outbound: mpsc::Sender<String>) {
        if self.peers.contains_key(&connection) {
            self.leave_all(connection);
        }
        self.peers.insert(
            connection,
            Peer {
                outbound,
                rooms: BTreeSet::new(),
            },
        );
    }

    /// Forget a connection entirely. Dropping its queue ends the socket writer.
    pub fn unregister(&mut self, connection: ConnectionId) {
        self.leave_all(connection);
        self.peers.remove(&connection);
    }

    /// Whether `connection` is registered.
    pub fn is_registered(&self, connection: ConnectionId) -> bool {
        self.peers.contains_key(&connection)
    }

    /// Total number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.peers.len()
    }

    /// Rooms `connection` is currently in.
    pub fn rooms_of(&self, connection: ConnectionId) -> Vec<RoomId> {
        self.peers
            .get(&connection)
            .map(|peer| peer.rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Serialize the dispatch once and queue it for every connection in its
    /// audience. Returns how many connections it was queued for.
    pub fn deliver(&self, dispatch: &Dispatch) -> usize {
        let json = match serde_json::to_string(&dispatch.message) {
            Ok(json) => json,
            Err(e) => {
                error!("failed to serialize ServerMessage: {e}");
                return 0;
            }
        };

        let targets: Vec<ConnectionId> = match &dispatch.audience {
            Audience::Room(room) => self.members(room).collect(),
            Audience::RoomExcept(room, sender) => {
                self.members(room).filter(|id| id != sender).collect()
            }
            Audience::Connection(connection) => vec![*connection],
        };

        let event = dispatch.message.event_name();
        let mut delivered = 0;
        for id in targets {
            if self.push(id, event, json.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    fn members<'a>(&'a self, room: &str) -> impl Iterator<Item = ConnectionId> + 'a {
        self.rooms.get(room).into_iter().flatten().copied()
    }

    fn push(&self, connection: ConnectionId, event: &str, json: String) -> bool {
        let Some(peer) = self.peers.get(&connection) else {
            debug!(%connection, event, "dropping message for unknown connection");
            return false;
        };
        match peer.outbound.try_send(json) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%connection, event, "outbound queue full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(%connection, event, "outbound queue closed, connection going away");
                false
            }
        }
    }
}

impl Membership for RoomRegistry {
    fn join(&mut self, connection: ConnectionId, room: &str) {
        let Some(peer) = self.peers.get_mut(&connection) else {
            debug!(%connection, room, "ignoring join from unregistered connection");
            return;
        };
        peer.rooms.insert(room.to_owned());
        self.rooms
            .entry(room.to_owned())
            .or_default()
            .insert(connection);
    }

    fn room_size(&self, room: &str) -> usize {
        self.rooms.get(room).map_or(0, HashSet::len)
    }

    fn leave_all(&mut self, connection: ConnectionId) -> Vec<RoomId> {
        let Some(peer) = self.peers.get_mut(&connection) else {
            return Vec::new();
        };
        let left = std::mem::take(&mut peer.rooms);
        for room in &left {
            if let Some(members) = self.rooms.get_mut(room) {
                members.remove(&connection);
                if members.is_empty() {
                    self.rooms.remove(room);
                }
            }
        }
        left.into_iter().collect()
    }
}

impl std::fmt::Debug for RoomRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomRegistry")
            .field("connections", &self.peers.len())
            .field("rooms", &self.rooms.len())
            .finish()
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
    use crate::protocol::RoomMembership;
    use uuid::Uuid;

    fn joined(room: &str, users: usize) -> ServerMessage {
        ServerMessage::RoomJoined(RoomMembership {
            room_id: room.into(),
            users,
        })
    }

    fn connect(registry: &mut RoomRegistry, n: u128) -> (ConnectionId, mpsc::Receiver<String>) {
        let id = Uuid::from_u128(n);
        let (tx, rx) = mpsc::channel(8);
        registry.register(id, tx);
        (id, rx)
    }

    #[test]
    fn join_and_leave_track_room_size() {
        let mut registry = RoomRegistry::new();
        let (a, _ra) = connect(&mut registry, 1);
        let (b, _rb) = connect(&mut registry, 2);

        registry.join(a, "r1");
        registry.join(a, "r1");
        registry.join(b, "r1");
        registry.join(b, "r2");
        assert_eq!(registry.room_size("r1"), 2);
        assert_eq!(registry.room_size("r2"), 1);

        let left = registry.leave_all(b);
        assert_eq!(left, vec!["r1".to_string(), "r2".to_string()]);
        assert_eq!(registry.room_size("r1"), 1);
        assert_eq!(registry.room_size("r2"), 0);
        assert!(registry.rooms_of(b).is_empty());
    }

    #[test]
    fn unregistered_connection_cannot_join() {
        let mut registry = RoomRegistry::new();
        registry.join(Uuid::from_u128(9), "r1");
        assert_eq!(registry.room_size("r1"), 0);
    }

    #[test]
    fn room_except_skips_sender() {
        let mut registry = RoomRegistry::new();
        let (a, mut ra) = connect(&mut registry, 1);
        let (b, mut rb) = connect(&mut registry, 2);
        registry.join(a, "r1");
        registry.join(b, "r1");

        let delivered = registry.deliver(&Dispatch::to_room_except("r1", a, joined("r1", 2)));
        assert_eq!(delivered, 1);
        assert!(ra.try_recv().is_err());
        let frame: ServerMessage = serde_json::from_str(&rb.try_recv().unwrap()).unwrap();
        assert_eq!(frame, joined("r1", 2));
    }

    #[test]
    fn room_broadcast_reaches_everyone_in_room_only() {
        let mut registry = RoomRegistry::new();
        let (a, mut ra) = connect(&mut registry, 1);
        let (b, mut rb) = connect(&mut registry, 2);
        let (_c, mut rc) = connect(&mut registry, 3);
        registry.join(a, "r1");
        registry.join(b, "r1");

        assert_eq!(registry.deliver(&Dispatch::to_room("r1", joined("r1", 2))), 2);
        assert!(ra.try_recv().is_ok());
        assert!(rb.try_recv().is_ok());
        assert!(rc.try_recv().is_err());
    }

    #[test]
    fn full_queue_drops_only_that_frame() {
        let mut registry = RoomRegistry::new();
        let id = Uuid::from_u128(1);
        let (tx, mut rx) = mpsc::channel(1);
        registry.register(id, tx);

        assert_eq!(registry.deliver(&Dispatch::to_connection(id, joined("r1", 1))), 1);
        assert_eq!(registry.deliver(&Dispatch::to_connection(id, joined("r1", 2))), 0);

        let frame: ServerMessage = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame, joined("r1", 1));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unregister_forgets_connection_and_membership() {
        let mut registry = RoomRegistry::new();
        let (a, _ra) = connect(&mut registry, 1);
        registry.join(a, "r1");
        registry.unregister(a);
        assert!(!registry.is_registered(a));
        assert_eq!(registry.room_size("r1"), 0);
        assert_eq!(registry.connection_count(), 0);
    }
}
