//! Connection registry: which identity owns a connection and which rooms
//! it has joined.
//!
//! The handler consults it to route `SubmitMove`/`LeaveRoom`/`Resign` to
//! the right room handle, and on disconnect to leave every room the
//! connection was in.

use std::collections::HashMap;

use dashmap::DashMap;
use kingside_protocol::{ConnectionId, RoomId, UserId};
use kingside_room::RoomHandle;

struct ConnectionEntry {
    user: UserId,
    rooms: HashMap<RoomId, RoomHandle>,
}

/// What a connection left behind when it was unregistered.
pub struct Departed {
    pub user: UserId,
    pub rooms: Vec<RoomHandle>,
}

/// Maps live connections to their identity and joined rooms.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an authenticated connection.
    pub fn register(&self, conn: ConnectionId, user: UserId) {
        self.connections.insert(
            conn,
            ConnectionEntry {
                user,
                rooms: HashMap::new(),
            },
        );
    }

    /// Forgets a connection, returning the rooms it still has to leave.
    pub fn unregister(&self, conn: ConnectionId) -> Option<Departed> {
        self.connections.remove(&conn).map(|(_, entry)| Departed {
            user: entry.user,
            rooms: entry.rooms.into_values().collect(),
        })
    }

    /// Records that `conn` joined the room behind `handle`. Joining again
    /// replaces the stored handle.
    pub fn enter(&self, conn: ConnectionId, handle: RoomHandle) {
        if let Some(mut entry) = self.connections.get_mut(&conn) {
            entry.rooms.insert(handle.room_id().clone(), handle);
        }
    }

    /// Records that `conn` left `room_id`.
    pub fn exit(&self, conn: ConnectionId, room_id: &RoomId) -> Option<RoomHandle> {
        self.connections
            .get_mut(&conn)
            .and_then(|mut entry| entry.rooms.remove(room_id))
    }

    /// The handle `conn` joined `room_id` through, if it did.
    pub fn room(&self, conn: ConnectionId, room_id: &RoomId) -> Option<RoomHandle> {
        self.connections
            .get(&conn)
            .and_then(|entry| entry.rooms.get(room_id).cloned())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kingside_room::{RoomInit, RoomStore};
    use kingside_rules::StandardChess;

    fn store() -> RoomStore<StandardChess> {
        RoomStore::new(StandardChess, Default::default())
    }

    #[test]
    fn test_each_connection_registered_separately() {
        let registry = ConnectionRegistry::new();
        registry.register(ConnectionId::new(1), UserId::new("alice"));
        registry.register(ConnectionId::new(2), UserId::new("alice"));
        registry.register(ConnectionId::new(3), UserId::new("bob"));
        assert_eq!(registry.len(), 3);

        let departed = registry.unregister(ConnectionId::new(2)).unwrap();
        assert_eq!(departed.user, UserId::new("alice"));
        assert!(departed.rooms.is_empty());
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_enter_and_exit_track_rooms() {
        let store = store();
        let registry = ConnectionRegistry::new();
        let conn = ConnectionId::new(1);
        registry.register(conn, UserId::new("alice"));

        let handle = store.get_or_create("r1", RoomInit::casual()).await.unwrap();
        let room_id = handle.room_id().clone();
        registry.enter(conn, handle.clone());
        assert!(registry.room(conn, &room_id).unwrap().same_room(&handle));

        assert!(registry.exit(conn, &room_id).is_some());
        assert!(registry.room(conn, &room_id).is_none());
        assert!(registry.exit(conn, &room_id).is_none());
    }

    #[tokio::test]
    async fn test_unregister_returns_joined_rooms() {
        let store = store();
        let registry = ConnectionRegistry::new();
        let conn = ConnectionId::new(7);
        registry.register(conn, UserId::new("bob"));
        registry.enter(conn, store.get_or_create("a", RoomInit::casual()).await.unwrap());
        registry.enter(conn, store.get_or_create("b", RoomInit::casual()).await.unwrap());

        let departed = registry.unregister(conn).unwrap();
        assert_eq!(departed.user, UserId::new("bob"));
        assert_eq!(departed.rooms.len(), 2);
        assert!(registry.is_empty());
        assert!(registry.unregister(conn).is_none());
    }

    #[tokio::test]
    async fn test_enter_unknown_connection_is_ignored() {
        let registry = ConnectionRegistry::new();
        let store = store();
        let handle = store.get_or_create("r", RoomInit::casual()).await.unwrap();
        let room_id = handle.room_id().clone();
        registry.enter(ConnectionId::new(9), handle);
        assert!(registry.room(ConnectionId::new(9), &room_id).is_none());
        assert!(registry.unregister(ConnectionId::new(9)).is_none());
    }
}
