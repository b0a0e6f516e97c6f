//! Fan-out of room events to subscribed connections.
//!
//! The dispatcher lives inside the room actor and is only called after a
//! mutation has been applied, so every connection sees events in mutation
//! order. Sends go onto per-connection unbounded channels and never wait
//! on the network; the connection's writer task does the I/O.

use std::collections::HashMap;

use kingside_protocol::{
    ConnectionId, GameResult, MembershipView, RoomId, ServerMessage, Snapshot, UserId,
};
use tokio::sync::mpsc;

/// Outbound channel of one connection.
pub type ConnectionSender = mpsc::UnboundedSender<ServerMessage>;

/// Something every subscriber of a room should hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    MoveApplied(Snapshot),
    MembershipChanged(MembershipView),
    GameOver { room_id: RoomId, result: GameResult },
}

impl From<RoomEvent> for ServerMessage {
    fn from(event: RoomEvent) -> Self {
        match event {
            RoomEvent::MoveApplied(snapshot) => Self::MoveApplied { snapshot },
            RoomEvent::MembershipChanged(view) => Self::MembershipChanged { view },
            RoomEvent::GameOver { room_id, result } => Self::GameOver { room_id, result },
        }
    }
}

struct Subscriber {
    user: UserId,
    sender: ConnectionSender,
}

/// The set of connections following one room.
pub(crate) struct Dispatcher {
    room_id: RoomId,
    subscribers: HashMap<ConnectionId, Subscriber>,
}

impl Dispatcher {
    pub(crate) fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            subscribers: HashMap::new(),
        }
    }

    /// Adds (or replaces) a subscription and delivers the current state to
    /// it before anything else.
    pub(crate) fn subscribe(
        &mut self,
        conn: ConnectionId,
        user: UserId,
        sender: ConnectionSender,
        snapshot: Snapshot,
    ) {
        let _ = sender.send(ServerMessage::RoomState { snapshot });
        self.subscribers.insert(conn, Subscriber { user, sender });
    }

    pub(crate) fn unsubscribe(&mut self, conn: ConnectionId) -> bool {
        self.subscribers.remove(&conn).is_some()
    }

    /// Whether `conn` is subscribed on behalf of `user`.
    pub(crate) fn is_subscribed(&self, conn: ConnectionId, user: &UserId) -> bool {
        self.subscribers
            .get(&conn)
            .is_some_and(|s| &s.user == user)
    }

    /// Sends `event` to every subscriber. Connections whose receiver is gone
    /// are dropped from the set and returned, so the room can let them go
    /// too.
    pub(crate) fn publish(&mut self, event: RoomEvent) -> Vec<(ConnectionId, UserId)> {
        let msg = ServerMessage::from(event);
        let mut closed = Vec::new();
        self.subscribers.retain(|conn, sub| {
            let open = sub.sender.send(msg.clone()).is_ok();
            if !open {
                closed.push((*conn, sub.user.clone()));
            }
            open
        });
        if !closed.is_empty() {
            tracing::debug!(
                room_id = %self.room_id,
                dropped = closed.len(),
                "pruned closed subscribers"
            );
        }
        closed
    }

    pub(crate) fn len(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use kingside_protocol::{Color, RoomStatus};

    use super::*;

    fn room() -> RoomId {
        RoomId::parse("bcast").unwrap()
    }

    fn snapshot() -> Snapshot {
        Snapshot {
            room_id: room(),
            position: "start".into(),
            side_to_move: Color::White,
            move_log: vec![],
            status: RoomStatus::Pending,
            is_rated: false,
            time_control: None,
            clocks: None,
            result: None,
        }
    }

    #[test]
    fn test_subscribe_delivers_room_state_first() {
        let mut d = Dispatcher::new(room());
        let (tx, mut rx) = mpsc::unbounded_channel();
        d.subscribe(ConnectionId::new(1), UserId::new("u1"), tx, snapshot());

        d.publish(RoomEvent::MoveApplied(snapshot()));

        assert!(matches!(rx.try_recv(), Ok(ServerMessage::RoomState { .. })));
        assert!(matches!(rx.try_recv(), Ok(ServerMessage::MoveApplied { .. })));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_publish_reaches_every_subscriber_in_order() {
        let mut d = Dispatcher::new(room());
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        d.subscribe(ConnectionId::new(1), UserId::new("u1"), tx1, snapshot());
        d.subscribe(ConnectionId::new(2), UserId::new("u2"), tx2, snapshot());

        let mut second = snapshot();
        second.position = "after".into();
        d.publish(RoomEvent::MoveApplied(snapshot()));
        d.publish(RoomEvent::MoveApplied(second));

        for rx in [&mut rx1, &mut rx2] {
            let _state = rx.try_recv().unwrap();
            let positions: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
                .map(|m| match m {
                    ServerMessage::MoveApplied { snapshot } => snapshot.position,
                    other => panic!("unexpected {other:?}"),
                })
                .collect();
            assert_eq!(positions, ["start", "after"]);
        }
    }

    #[test]
    fn test_publish_prunes_closed_receivers() {
        let mut d = Dispatcher::new(room());
        let (tx, rx) = mpsc::unbounded_channel();
        d.subscribe(ConnectionId::new(1), UserId::new("u1"), tx, snapshot());
        drop(rx);

        let (tx2, _rx2) = mpsc::unbounded_channel();
        d.subscribe(ConnectionId::new(2), UserId::new("u2"), tx2, snapshot());

        let closed = d.publish(RoomEvent::MoveApplied(snapshot()));
        assert_eq!(closed, vec![(ConnectionId::new(1), UserId::new("u1"))]);
        assert_eq!(d.len(), 1);
        assert!(d.publish(RoomEvent::MoveApplied(snapshot())).is_empty());
    }

    #[test]
    fn test_unsubscribe_and_identity_check() {
        let mut d = Dispatcher::new(room());
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = ConnectionId::new(7);
        d.subscribe(conn, UserId::new("u1"), tx, snapshot());

        assert!(d.is_subscribed(conn, &UserId::new("u1")));
        assert!(!d.is_subscribed(conn, &UserId::new("mallory")));
        assert!(d.unsubscribe(conn));
        assert!(!d.unsubscribe(conn));
    }
}
