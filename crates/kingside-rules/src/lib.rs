//! The rules-engine seam for Kingside rooms.
//!
//! Rooms never decide what a legal chess move is. They hand positions and
//! moves to a [`RulesEngine`] and act on what it says. The engine is pure:
//! `apply` returns a *new* position and never mutates the old one, so a
//! rejected move leaves the room untouched.
//!
//! [`StandardChess`] (feature `standard`, on by default) adapts the `chess`
//! crate. Anything else (variants, a remote engine, a scripted fake in
//! tests) only needs to implement the trait.

mod error;
#[cfg(feature = "standard")]
mod standard;

pub use error::RulesError;
#[cfg(feature = "standard")]
pub use standard::{ChessPosition, StandardChess};

use kingside_protocol::{Color, Move, MoveRequest};

/// A game-ending condition the engine can see from the position alone.
///
/// Clock forfeits, resignations, and abandonment are not here: they are
/// room concerns, not board concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Terminal {
    /// The side to move is in check and has no legal reply.
    Checkmate,
    /// The side to move is not in check and has no legal move.
    Stalemate,
    /// The current position has occurred three times.
    ThreefoldRepetition,
    /// Neither side can possibly deliver mate.
    InsufficientMaterial,
}

/// Legality, application, and terminal detection for one game type.
///
/// # Trait bounds
///
/// - `Send + Sync + 'static` → one engine instance is shared (behind an
///   `Arc`) by every room actor on every runtime thread.
/// - `Position: Clone + Send` → each room owns its position and moves it
///   between tasks.
pub trait RulesEngine: Send + Sync + 'static {
    /// Opaque position type. Rooms store it but never look inside.
    type Position: Clone + Send + Sync + 'static;

    /// The position every new room starts from.
    fn initial_position(&self) -> Self::Position;

    /// Which color is to move in `position`.
    fn side_to_move(&self, position: &Self::Position) -> Color;

    /// Every legal move in `position`.
    fn legal_moves(&self, position: &Self::Position) -> Vec<MoveRequest>;

    /// Returns the position after `mv`, or why `mv` cannot be played.
    ///
    /// # Errors
    /// - [`RulesError::MalformedMove`] if the squares or promotion piece
    ///   can't be parsed
    /// - [`RulesError::IllegalMove`] if the move is well formed but not
    ///   legal here
    fn apply(
        &self,
        position: &Self::Position,
        mv: &MoveRequest,
    ) -> Result<Self::Position, RulesError>;

    /// The terminal condition of `position`, if any.
    fn terminal_status(&self, position: &Self::Position) -> Option<Terminal>;

    /// A stable textual rendering of `position` (FEN for chess). Two
    /// positions reached by the same moves render identically.
    fn render(&self, position: &Self::Position) -> String;

    /// Rebuilds a position by playing `log` from the initial position.
    ///
    /// # Errors
    /// Fails on the first move that does not apply.
    fn replay(&self, log: &[Move]) -> Result<Self::Position, RulesError> {
        let mut position = self.initial_position();
        for mv in log {
            let req = MoveRequest {
                from: mv.from.clone(),
                to: mv.to.clone(),
                promotion: mv.promotion,
            };
            position = self.apply(&position, &req)?;
        }
        Ok(position)
    }
}
