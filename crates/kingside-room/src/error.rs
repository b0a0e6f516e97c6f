//! Error types for the room layer.

use kingside_protocol::{ErrorCode, RoomId, UserId};

/// Why a move (or resignation) was refused. The room is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoveError {
    /// The submitter does not hold the color to move. Spectators and
    /// strangers get this too.
    #[error("not your turn")]
    NotYourTurn,

    /// The rules engine refused the move.
    #[error("illegal move: {0}")]
    IllegalMove(String),

    /// The room already has a result.
    #[error("game is already over")]
    GameAlreadyOver,
}

impl MoveError {
    /// The wire code reported back to the submitter.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotYourTurn => ErrorCode::NotYourTurn,
            Self::IllegalMove(_) => ErrorCode::IllegalMove,
            Self::GameAlreadyOver => ErrorCode::GameAlreadyOver,
        }
    }
}

/// Errors that can occur during room operations.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The room identifier is malformed. Raised before any lookup.
    #[error("invalid room id {0:?}")]
    InvalidRoomId(String),

    /// The room did not answer within the busy timeout. Safe to retry.
    #[error("room {0} is busy")]
    RoomBusy(RoomId),

    /// The room actor is gone (evicted or shut down).
    #[error("room {0} is unavailable")]
    Unavailable(RoomId),

    /// The connection is not subscribed to this room.
    #[error("{0} is not in room {1}")]
    NotInRoom(UserId, RoomId),

    /// The room refused a move.
    #[error(transparent)]
    Move(#[from] MoveError),

    /// The archived record for this id could not be read back.
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

impl RoomError {
    /// The wire code reported back to the caller.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidRoomId(_) => ErrorCode::InvalidRoomId,
            Self::RoomBusy(_) => ErrorCode::RoomBusy,
            Self::Unavailable(_) => ErrorCode::Unavailable,
            Self::NotInRoom(..) => ErrorCode::NotInRoom,
            Self::Move(e) => e.code(),
            Self::Archive(_) => ErrorCode::Unavailable,
        }
    }
}

/// Failure to persist or load a completed game.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The room already has a record. It is never replaced.
    #[error("room {0} is already archived")]
    AlreadyArchived(RoomId),

    /// A stored move log that the rules engine refuses to replay.
    #[error("archived game {0} does not replay: {1}")]
    Unreplayable(RoomId, String),

    /// The blocking task doing the I/O did not finish.
    #[error("archive task failed: {0}")]
    Task(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_error_codes() {
        assert_eq!(MoveError::NotYourTurn.code(), ErrorCode::NotYourTurn);
        assert_eq!(
            MoveError::IllegalMove("e2e5".into()).code(),
            ErrorCode::IllegalMove
        );
        assert_eq!(MoveError::GameAlreadyOver.code(), ErrorCode::GameAlreadyOver);
    }

    #[test]
    fn test_room_error_wraps_move_error_code() {
        let err = RoomError::from(MoveError::NotYourTurn);
        assert_eq!(err.code(), ErrorCode::NotYourTurn);
        assert_eq!(err.to_string(), "not your turn");
    }

    #[test]
    fn test_unreadable_archive_reports_unavailable() {
        let room = RoomId::parse("old").unwrap();
        let err = RoomError::from(ArchiveError::Unreplayable(room, "e2e5".into()));
        assert_eq!(err.code(), ErrorCode::Unavailable);
    }
}
