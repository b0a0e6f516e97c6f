//! Error types for the rules layer.

/// Why the engine refused a move or a position.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RulesError {
    /// The move text could not be understood (bad square, bad promotion
    /// piece).
    #[error("malformed move: {0}")]
    MalformedMove(String),

    /// The move is well formed but not legal in the current position.
    #[error("illegal move: {0}")]
    IllegalMove(String),

    /// A position description (FEN) could not be parsed.
    #[error("invalid position: {0}")]
    InvalidPosition(String),
}
