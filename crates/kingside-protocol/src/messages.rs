//! Wire messages exchanged over a connection.
//!
//! Both directions use internally tagged JSON (`{"type": "JoinRoom", ...}`),
//! which is what the web client expects. One connection multiplexes any
//! number of rooms, so every room-scoped message names its room.

use serde::{Deserialize, Serialize};

use crate::{
    Color, GameResult, MembershipView, MoveRequest, Participant, Role,
    RoomId, Snapshot, TimeControl, UserId,
};

/// Messages a client sends to the server.
///
/// Room ids arrive as raw strings and are validated by the server, so a
/// malformed id produces an `InvalidRoomId` error instead of an undecodable
/// frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// First frame on every connection.
    Hello {
        version: u32,
        #[serde(default)]
        token: Option<String>,
    },

    /// Join (or lazily create) a room. `time_control` and `rated` only
    /// matter to whoever creates the room.
    JoinRoom {
        room_id: String,
        #[serde(default)]
        role: Role,
        #[serde(default)]
        color: Option<Color>,
        #[serde(default)]
        display_name: Option<String>,
        #[serde(default)]
        time_control: Option<TimeControl>,
        #[serde(default)]
        rated: bool,
    },

    /// Play a move in a room where this user holds a seat.
    SubmitMove {
        room_id: String,
        #[serde(rename = "move")]
        mv: MoveRequest,
    },

    /// Stop following a room. A seated player keeps the seat for the grace
    /// period.
    LeaveRoom { room_id: String },

    /// Concede the game.
    Resign { room_id: String },

    /// Keep-alive. Answered with [`ServerMessage::Pong`].
    Ping { client_time: u64 },
}

/// Closed set of error codes carried by [`ServerMessage::Error`] and
/// [`ServerMessage::MoveResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    VersionMismatch,
    InvalidRoomId,
    NotInRoom,
    NotYourTurn,
    IllegalMove,
    GameAlreadyOver,
    RoomBusy,
    Unavailable,
}

/// Messages the server sends to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Handshake accepted.
    Welcome { user_id: UserId, protocol_version: u32 },

    /// Reply to `JoinRoom`: the role actually granted plus full state.
    Joined {
        room_id: RoomId,
        participant: Participant,
        membership: MembershipView,
        snapshot: Snapshot,
    },

    /// Reply to `LeaveRoom`.
    Left { room_id: RoomId },

    /// Reply to `SubmitMove` and `Resign`.
    MoveResult {
        room_id: RoomId,
        accepted: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<ErrorCode>,
    },

    /// Full room state, delivered once when a connection subscribes.
    RoomState { snapshot: Snapshot },

    /// Broadcast after every accepted move.
    MoveApplied { snapshot: Snapshot },

    /// Broadcast after every join, leave, reconnect, or seat release.
    MembershipChanged { view: MembershipView },

    /// Broadcast exactly once per room when the result is decided.
    GameOver { room_id: RoomId, result: GameResult },

    /// Unicast to the connection that caused it. Never broadcast.
    Error {
        code: ErrorCode,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
    },

    /// Reply to `Ping`.
    Pong { client_time: u64, server_time: u64 },
}

impl ServerMessage {
    /// Shorthand for an error frame.
    pub fn error(
        code: ErrorCode,
        message: impl Into<String>,
        room_id: Option<RoomId>,
    ) -> Self {
        Self::Error {
            code,
            message: message.into(),
            room_id,
        }
    }

    /// The room this message is about, if it is room-scoped.
    pub fn room_id(&self) -> Option<&RoomId> {
        match self {
            Self::Joined { room_id, .. }
            | Self::Left { room_id }
            | Self::MoveResult { room_id, .. }
            | Self::GameOver { room_id, .. } => Some(room_id),
            Self::RoomState { snapshot } | Self::MoveApplied { snapshot } => {
                Some(&snapshot.room_id)
            }
            Self::MembershipChanged { view } => Some(&view.room_id),
            Self::Error { room_id, .. } => room_id.as_ref(),
            Self::Welcome { .. } | Self::Pong { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_room_defaults_to_spectator() {
        let json = r#"{"type": "JoinRoom", "room_id": "r1"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            ClientMessage::JoinRoom {
                room_id: "r1".into(),
                role: Role::Spectator,
                color: None,
                display_name: None,
                time_control: None,
                rated: false,
            }
        );
    }

    #[test]
    fn test_join_room_with_seat_request() {
        let json = r#"{
            "type": "JoinRoom",
            "room_id": "r1",
            "role": "Player",
            "color": "Black",
            "time_control": { "initial_secs": 300, "increment_secs": 2 },
            "rated": true
        }"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::JoinRoom {
                role,
                color,
                time_control,
                rated,
                ..
            } => {
                assert_eq!(role, Role::Player);
                assert_eq!(color, Some(Color::Black));
                assert_eq!(time_control, Some(TimeControl::new(300, 2)));
                assert!(rated);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_submit_move_uses_move_key() {
        let json = r#"{
            "type": "SubmitMove",
            "room_id": "r1",
            "move": { "from": "e7", "to": "e8", "promotion": "q" }
        }"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            ClientMessage::SubmitMove {
                room_id: "r1".into(),
                mv: MoveRequest::new("e7", "e8").promoting('q'),
            }
        );
    }

    #[test]
    fn test_unknown_client_message_type_is_rejected() {
        let result: Result<ClientMessage, _> =
            serde_json::from_str(r#"{"type": "Chat", "text": "gg"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_error_message_json_shape() {
        let msg = ServerMessage::error(
            ErrorCode::NotYourTurn,
            "white to move",
            Some(RoomId::parse("r1").unwrap()),
        );
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "Error");
        assert_eq!(json["code"], "NotYourTurn");
        assert_eq!(json["room_id"], "r1");
    }

    #[test]
    fn test_move_result_omits_reason_when_accepted() {
        let msg = ServerMessage::MoveResult {
            room_id: RoomId::parse("r1").unwrap(),
            accepted: true,
            reason: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["accepted"], true);
        assert!(json.get("reason").is_none());
    }

    #[test]
    fn test_room_id_of_unscoped_messages_is_none() {
        let pong = ServerMessage::Pong {
            client_time: 1,
            server_time: 2,
        };
        assert!(pong.room_id().is_none());
    }
}
