//! Wire protocol and shared data model for Kingside.
//!
//! This crate defines the "language" that clients, rooms, and the server
//! speak:
//!
//! - **Identity** ([`UserId`], [`RoomId`], [`ConnectionId`])
//! - **Game data** ([`Move`], [`Participant`], [`Snapshot`],
//!   [`GameResult`], [`RoomStatus`]...)
//! - **Messages** ([`ClientMessage`], [`ServerMessage`]) and their framing
//! - **Errors** ([`ProtocolError`])
//!
//! # Architecture
//!
//! ```text
//! Transport (bytes) → Protocol (frames, model) → Room (behaviour)
//! ```
//!
//! Nothing here knows about connections or actors. Types are plain data.

mod error;
mod frame;
mod messages;
mod types;

pub use error::ProtocolError;
pub use frame::{
    decode_client, decode_server, encode_client, encode_server, ServerFrame,
    PROTOCOL_VERSION,
};
pub use messages::{ClientMessage, ErrorCode, ServerMessage};
pub use types::{
    ClockView, Color, ConnectionId, EndReason, GameResult, MembershipView,
    Move, MoveRequest, Outcome, Participant, Role, RoomId, RoomStatus,
    Snapshot, TimeControl, UserId,
};
