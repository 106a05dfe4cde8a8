//! Per-project channel state.

use dashmap::DashMap;
use inksync_core::{PresenceRecord, ServerMessage};
use std::collections::HashMap;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// A message fanned out to a room, tagged with the sending connection.
pub type RoomMessage = (String, ServerMessage);

/// One project channel.
struct Room {
    tx: broadcast::Sender<RoomMessage>,
    /// Presence keyed by connection id, so one user may hold several tabs.
    peers: HashMap<String, PresenceRecord>,
    /// Highest snapshot version announced in this room.
    version: u64,
}

impl Room {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            peers: HashMap::new(),
            version: 0,
        }
    }
}

/// What a joining connection needs to start.
pub struct Joined {
    pub rx: broadcast::Receiver<RoomMessage>,
    /// Presence of everyone already in the room.
    pub peers: Vec<PresenceRecord>,
    pub version: u64,
}

/// A connection that left a room.
pub struct Left {
    pub presence: PresenceRecord,
    /// No other connection of the same user remains in the room.
    pub user_gone: bool,
}

/// Shared relay state.
#[derive(Default)]
pub struct Rooms {
    rooms: DashMap<String, Room>,
}

impl Rooms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn peer_count(&self) -> usize {
        self.rooms.iter().map(|r| r.peers.len()).sum()
    }

    pub fn join(&self, topic: &str, conn_id: &str, presence: PresenceRecord) -> Joined {
        let mut room = self.rooms.entry(topic.to_string()).or_insert_with(Room::new);
        let peers = room.peers.values().cloned().collect();
        room.peers.insert(conn_id.to_string(), presence);
        Joined {
            rx: room.tx.subscribe(),
            peers,
            version: room.version,
        }
    }

    /// Remove a connection. Returns its last presence; empty rooms are dropped.
    pub fn leave(&self, topic: &str, conn_id: &str) -> Option<Left> {
        let mut room = self.rooms.get_mut(topic)?;
        let presence = room.peers.remove(conn_id)?;
        let user_gone = !room.peers.values().any(|p| p.user_id == presence.user_id);
        if room.peers.is_empty() {
            drop(room);
            self.rooms.remove(topic);
        }
        Some(Left { presence, user_gone })
    }

    /// Store the latest presence of a connection.
    pub fn update_presence(&self, topic: &str, conn_id: &str, presence: PresenceRecord) {
        if let Some(mut room) = self.rooms.get_mut(topic) {
            room.peers.insert(conn_id.to_string(), presence);
        }
    }

    /// Record a saved version. Returns true if it is newer than anything
    /// announced before and should be broadcast.
    pub fn record_version(&self, topic: &str, version: u64) -> bool {
        match self.rooms.get_mut(topic) {
            Some(mut room) if version > room.version => {
                room.version = version;
                true
            }
            _ => false,
        }
    }

    pub fn broadcast(&self, topic: &str, from: &str, msg: ServerMessage) {
        if let Some(room) = self.rooms.get(topic) {
            let _ = room.tx.send((from.to_string(), msg));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inksync_core::Identity;

    fn presence(user: &str) -> PresenceRecord {
        PresenceRecord::for_identity(&Identity::new(user, user))
    }

    #[test]
    fn test_join_reports_existing_peers() {
        let rooms = Rooms::new();
        let first = rooms.join("project:a", "c1", presence("alice"));
        assert!(first.peers.is_empty());

        let second = rooms.join("project:a", "c2", presence("bob"));
        assert_eq!(second.peers.len(), 1);
        assert_eq!(second.peers[0].user_id, "alice");
        assert_eq!(rooms.peer_count(), 2);
    }

    #[test]
    fn test_leave_drops_empty_room() {
        let rooms = Rooms::new();
        rooms.join("project:a", "c1", presence("alice"));
        let left = rooms.leave("project:a", "c1").unwrap();
        assert_eq!(left.presence.user_id, "alice");
        assert!(left.user_gone);
        assert_eq!(rooms.room_count(), 0);
        assert!(rooms.leave("project:a", "c1").is_none());
    }

    #[test]
    fn test_leave_with_second_tab_keeps_user() {
        let rooms = Rooms::new();
        rooms.join("project:a", "tab1", presence("alice"));
        rooms.join("project:a", "tab2", presence("alice"));
        rooms.join("project:a", "c3", presence("bob"));

        let first = rooms.leave("project:a", "tab1").unwrap();
        assert!(!first.user_gone);
        let second = rooms.leave("project:a", "tab2").unwrap();
        assert!(second.user_gone);
        assert_eq!(rooms.peer_count(), 1);
    }

    #[test]
    fn test_version_only_moves_forward() {
        let rooms = Rooms::new();
        rooms.join("project:a", "c1", presence("alice"));
        assert!(rooms.record_version("project:a", 3));
        assert!(!rooms.record_version("project:a", 3));
        assert!(!rooms.record_version("project:a", 2));
        assert!(!rooms.record_version("project:missing", 9));

        let late = rooms.join("project:a", "c2", presence("bob"));
        assert_eq!(late.version, 3);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_subscriber() {
        let rooms = Rooms::new();
        let mut a = rooms.join("project:a", "c1", presence("alice")).rx;
        let mut b = rooms.join("project:a", "c2", presence("bob")).rx;

        rooms.broadcast("project:a", "c1", ServerMessage::VersionNotice { version: 4 });

        let (from_a, msg_a) = a.recv().await.unwrap();
        let (from_b, msg_b) = b.recv().await.unwrap();
        assert_eq!(from_a, "c1");
        assert_eq!(from_b, "c1");
        assert_eq!(msg_a, ServerMessage::VersionNotice { version: 4 });
        assert_eq!(msg_b, msg_a);
    }
}
