//! Identity types and the game data model shared by every Kingside crate.
//!
//! Everything in this module is plain data: it can be cloned, compared, and
//! serialized. The room layer owns the *behaviour*; these types only describe
//! what a room looks like from the outside at one instant.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// An opaque user identity issued by the external authenticator.
///
/// Kingside never interprets the contents. Two connections presenting the
/// same `UserId` are the same person (a phone and a laptop, say).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Creates a `UserId` from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrows the raw identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one live game for its whole lifetime.
///
/// Room ids come from the social app (usually the challenge post id), so
/// they are strings rather than server-assigned counters. They are validated
/// on the way in: 1 to 64 characters of `[A-Za-z0-9_-]`. Deserializing an
/// invalid id fails, so a `RoomId` value is always well formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    /// Longest accepted room id, in bytes.
    pub const MAX_LEN: usize = 64;

    /// Validates and wraps a raw room identifier.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidRoomId`] if the id is empty, longer
    /// than [`Self::MAX_LEN`], or contains a character outside
    /// `[A-Za-z0-9_-]`.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let well_formed = !raw.is_empty()
            && raw.len() <= Self::MAX_LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if well_formed {
            Ok(Self(raw.to_owned()))
        } else {
            // Truncate so a hostile multi-megabyte id doesn't end up in logs.
            Err(ProtocolError::InvalidRoomId(raw.chars().take(80).collect()))
        }
    }

    /// Borrows the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoomId {
    type Error = ProtocolError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Process-unique identifier for one transport connection.
///
/// One user may hold several connections at once; rooms track connections,
/// not users, when they decide who receives a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Colors and roles
// ---------------------------------------------------------------------------

/// One side of the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Color {
    White,
    Black,
}

impl Color {
    /// Both colors, white first. Seat assignment walks this order.
    pub const ALL: [Color; 2] = [Color::White, Color::Black];

    /// The other side.
    pub fn opposite(self) -> Self {
        match self {
            Self::White => Self::Black,
            Self::Black => Self::White,
        }
    }

    /// Array index for per-color storage (`0` = white, `1` = black).
    pub fn index(self) -> usize {
        match self {
            Self::White => 0,
            Self::Black => 1,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::White => write!(f, "white"),
            Self::Black => write!(f, "black"),
        }
    }
}

/// What a participant may do in a room.
///
/// A `Player` always holds a color; a `Spectator` never does. The room layer
/// is the only place that assigns roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Role {
    Player,
    #[default]
    Spectator,
}

// ---------------------------------------------------------------------------
// Room status
// ---------------------------------------------------------------------------

/// Lifecycle of a room.
///
/// ```text
/// Pending ──(first move)──→ Ongoing ──→ Completed
///    │                         │
///    ├──(resign)──→ Completed  └──(abandoned)──→ Aborted
///    └──(abandoned)──→ Aborted
/// ```
///
/// - **Pending**: room exists, seats may be filling, no move yet.
/// - **Ongoing**: at least one move accepted; clocks are running.
/// - **Completed**: a result was produced. The move log is frozen.
/// - **Aborted**: the idle policy gave up on the room. Also frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomStatus {
    Pending,
    Ongoing,
    Completed,
    Aborted,
}

impl RoomStatus {
    /// Returns `true` once the game can no longer change.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    /// Returns `true` if a join may be granted a player seat.
    pub fn accepts_players(self) -> bool {
        !self.is_terminal()
    }

    /// Returns `true` if moving from `self` to `target` is a legal step of
    /// the lifecycle.
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Ongoing)
                | (Self::Pending, Self::Completed)
                | (Self::Pending, Self::Aborted)
                | (Self::Ongoing, Self::Completed)
                | (Self::Ongoing, Self::Aborted)
        )
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "Pending",
            Self::Ongoing => "Ongoing",
            Self::Completed => "Completed",
            Self::Aborted => "Aborted",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Time control
// ---------------------------------------------------------------------------

/// Fischer time control: a starting budget plus a per-move increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeControl {
    pub initial_secs: u64,
    #[serde(default)]
    pub increment_secs: u64,
}

impl TimeControl {
    pub fn new(initial_secs: u64, increment_secs: u64) -> Self {
        Self {
            initial_secs,
            increment_secs,
        }
    }
}

/// Remaining time on both clocks, in milliseconds, as of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockView {
    pub white_ms: u64,
    pub black_ms: u64,
}

// ---------------------------------------------------------------------------
// Moves
// ---------------------------------------------------------------------------

/// A move as submitted by a client: squares in algebraic coordinates plus
/// an optional promotion piece (`q`, `r`, `b`, `n`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MoveRequest {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion: Option<char>,
}

impl MoveRequest {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            promotion: None,
        }
    }

    /// Same move with a promotion piece attached.
    pub fn promoting(mut self, piece: char) -> Self {
        self.promotion = Some(piece);
        self
    }

    /// Parses UCI coordinate notation (`e2e4`, `e7e8q`).
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidMessage`] if the text is not four or
    /// five ASCII characters.
    pub fn from_uci(text: &str) -> Result<Self, ProtocolError> {
        if !text.is_ascii() || !(4..=5).contains(&text.len()) {
            return Err(ProtocolError::InvalidMessage(format!(
                "not a coordinate move: {text:?}"
            )));
        }
        let mut req = Self::new(&text[0..2], &text[2..4]);
        req.promotion = text[4..].chars().next();
        Ok(req)
    }

    /// Renders the request in UCI coordinate notation, lowercased.
    pub fn uci(&self) -> String {
        let mut out = format!(
            "{}{}",
            self.from.to_ascii_lowercase(),
            self.to.to_ascii_lowercase()
        );
        if let Some(p) = self.promotion {
            out.push(p.to_ascii_lowercase());
        }
        out
    }

    /// Returns `true` if this request describes the already-applied `mv`.
    pub fn same_as(&self, mv: &Move) -> bool {
        self.uci() == mv.algebraic
    }
}

/// One accepted move. Immutable once appended to a room's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    /// 1-based position in the move log.
    pub ply: u32,
    /// The side that played it.
    pub color: Color,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion: Option<char>,
    /// UCI coordinate notation, e.g. `e2e4` or `e7e8q`.
    pub algebraic: String,
    pub applied_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Participants and membership
// ---------------------------------------------------------------------------

/// Someone in a room, as other people see them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub identity: UserId,
    pub display_name: String,
    pub role: Role,
    /// Always `Some` for players, always `None` for spectators.
    pub color: Option<Color>,
    /// `false` while a player's seat is reserved during the reconnection
    /// grace period.
    pub connected: bool,
}

/// Who is in a room right now.
///
/// `spectators` holds each identity once no matter how many connections it
/// has, and never lists anyone who holds a seat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipView {
    pub room_id: RoomId,
    pub white: Option<Participant>,
    pub black: Option<Participant>,
    pub spectators: Vec<Participant>,
}

impl MembershipView {
    /// The seated player of `color`, if any.
    pub fn player(&self, color: Color) -> Option<&Participant> {
        match color {
            Color::White => self.white.as_ref(),
            Color::Black => self.black.as_ref(),
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// How a game ended, from the scoreboard's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Win,
    Draw,
    Aborted,
}

/// Why a game ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    Checkmate,
    Stalemate,
    ThreefoldRepetition,
    InsufficientMaterial,
    TimeForfeit,
    Resignation,
    Abandonment,
}

/// The single, immutable result of a finished room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameResult {
    pub status: Outcome,
    pub reason: EndReason,
    /// The identity holding the winning color when the game ended. `None`
    /// for draws, aborts, and the (logged) case of an unheld winning seat.
    pub winner: Option<UserId>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: u64,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// An immutable, consistent read of one room at one instant.
///
/// Snapshots are produced inside the room's serialization point, so the
/// position, log, status, and clocks always describe the same moment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub room_id: RoomId,
    /// The rules engine's rendering of the position (FEN for standard chess).
    pub position: String,
    pub side_to_move: Color,
    pub move_log: Vec<Move>,
    pub status: RoomStatus,
    pub is_rated: bool,
    pub time_control: Option<TimeControl>,
    pub clocks: Option<ClockView>,
    pub result: Option<GameResult>,
}

impl Snapshot {
    /// Number of moves played so far.
    pub fn ply(&self) -> usize {
        self.move_log.len()
    }

    /// The log as UCI strings, handy for comparisons and logging.
    pub fn moves_uci(&self) -> Vec<&str> {
        self.move_log.iter().map(|m| m.algebraic.as_str()).collect()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // =====================================================================
    // RoomId
    // =====================================================================

    #[test]
    fn test_room_id_parse_accepts_slug_characters() {
        let id = RoomId::parse("challenge_42-b").unwrap();
        assert_eq!(id.as_str(), "challenge_42-b");
        assert_eq!(id.to_string(), "challenge_42-b");
    }

    #[test]
    fn test_room_id_parse_rejects_empty() {
        assert!(matches!(
            RoomId::parse(""),
            Err(ProtocolError::InvalidRoomId(_))
        ));
    }

    #[test]
    fn test_room_id_parse_rejects_bad_characters() {
        for bad in ["has space", "slash/room", "dot.room", "émoji"] {
            assert!(RoomId::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_room_id_parse_rejects_overlong() {
        let long = "a".repeat(RoomId::MAX_LEN + 1);
        assert!(RoomId::parse(&long).is_err());
        assert!(RoomId::parse(&long[..RoomId::MAX_LEN]).is_ok());
    }

    #[test]
    fn test_room_id_deserialize_validates() {
        let ok: RoomId = serde_json::from_str("\"r1\"").unwrap();
        assert_eq!(ok.as_str(), "r1");

        let bad: Result<RoomId, _> = serde_json::from_str("\"no spaces\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_room_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&RoomId::parse("r9").unwrap()).unwrap();
        assert_eq!(json, "\"r9\"");
    }

    // =====================================================================
    // UserId / ConnectionId
    // =====================================================================

    #[test]
    fn test_user_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&UserId::new("u1")).unwrap();
        assert_eq!(json, "\"u1\"");
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId::new(7).to_string(), "conn-7");
        assert_eq!(ConnectionId::new(7).into_inner(), 7);
    }

    // =====================================================================
    // Color / RoomStatus
    // =====================================================================

    #[test]
    fn test_color_opposite_and_index() {
        assert_eq!(Color::White.opposite(), Color::Black);
        assert_eq!(Color::Black.opposite(), Color::White);
        assert_eq!(Color::White.index(), 0);
        assert_eq!(Color::Black.index(), 1);
    }

    #[test]
    fn test_room_status_transitions() {
        assert!(RoomStatus::Pending.can_transition_to(RoomStatus::Ongoing));
        assert!(RoomStatus::Ongoing.can_transition_to(RoomStatus::Completed));
        assert!(RoomStatus::Ongoing.can_transition_to(RoomStatus::Aborted));
        assert!(!RoomStatus::Ongoing.can_transition_to(RoomStatus::Pending));
        assert!(!RoomStatus::Completed.can_transition_to(RoomStatus::Ongoing));
        assert!(!RoomStatus::Completed.can_transition_to(RoomStatus::Completed));
        assert!(!RoomStatus::Aborted.can_transition_to(RoomStatus::Completed));
    }

    #[test]
    fn test_room_status_terminal_states() {
        assert!(!RoomStatus::Pending.is_terminal());
        assert!(!RoomStatus::Ongoing.is_terminal());
        assert!(RoomStatus::Completed.is_terminal());
        assert!(RoomStatus::Aborted.is_terminal());
        assert!(!RoomStatus::Aborted.accepts_players());
    }

    // =====================================================================
    // MoveRequest
    // =====================================================================

    #[test]
    fn test_move_request_uci_lowercases_and_appends_promotion() {
        assert_eq!(MoveRequest::new("E2", "E4").uci(), "e2e4");
        assert_eq!(MoveRequest::new("e7", "e8").promoting('Q').uci(), "e7e8q");
    }

    #[test]
    fn test_move_request_from_uci() {
        let req = MoveRequest::from_uci("a7a8n").unwrap();
        assert_eq!(req.from, "a7");
        assert_eq!(req.to, "a8");
        assert_eq!(req.promotion, Some('n'));
        assert!(MoveRequest::from_uci("e2").is_err());
    }

    #[test]
    fn test_move_request_promotion_omitted_from_json_when_none() {
        let json = serde_json::to_value(MoveRequest::new("e2", "e4")).unwrap();
        assert!(json.get("promotion").is_none());
    }
}
