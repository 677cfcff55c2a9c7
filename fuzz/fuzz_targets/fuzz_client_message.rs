#![no_main]

use libfuzzer_sys::fuzz_target;
use watch_party_relay::membership::Membership;
use watch_party_relay::protocol::{
    payload_room, ClientMessage, ConnectionId, ControlAction, RoomId, SyncStateUpdate,
};
use watch_party_relay::SessionCoordinator;

/// Single-connection membership: enough to drive every handler.
#[derive(Default)]
struct Solo {
    rooms: Vec<RoomId>,
}

impl Membership for Solo {
    fn join(&mut self, _connection: ConnectionId, room: &str) {
        if !self.rooms.iter().any(|r| r == room) {
            self.rooms.push(room.to_owned());
        }
    }

    fn room_size(&self, room: &str) -> usize {
        usize::from(self.rooms.iter().any(|r| r == room))
    }

    fn leave_all(&mut self, _connection: ConnectionId) -> Vec<RoomId> {
        std::mem::take(&mut self.rooms)
    }
}

fuzz_target!(|data: &[u8]| {
    let Ok(msg) = serde_json::from_slice::<ClientMessage>(data) else {
        return;
    };

    if let ClientMessage::SyncState(payload) | ClientMessage::ControlAction(payload) = &msg {
        let _ = payload_room(payload);
        let _ = SyncStateUpdate::from_payload(payload);
        let _ = ControlAction::from_payload(payload);
    }

    let mut coordinator = SessionCoordinator::new();
    let mut membership = Solo::default();
    let sender = ConnectionId::nil();
    let _ = coordinator.handle(sender, msg, &mut membership);
    let _ = coordinator.disconnect(sender, &mut membership);
});
