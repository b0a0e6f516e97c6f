//! Game-over resolution.
//!
//! Pure function of what the board and the clocks say. It decides the
//! outcome and the winning *color*; turning that color into a person is
//! the session's job, because only the session knows who holds which seat.

use kingside_protocol::{Color, EndReason, Outcome};
use kingside_rules::Terminal;

/// A decided game, before it is attached to identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub outcome: Outcome,
    pub reason: EndReason,
    /// `None` for draws and aborts.
    pub winner: Option<Color>,
}

impl Verdict {
    pub fn win(winner: Color, reason: EndReason) -> Self {
        Self {
            outcome: Outcome::Win,
            reason,
            winner: Some(winner),
        }
    }

    pub fn draw(reason: EndReason) -> Self {
        Self {
            outcome: Outcome::Draw,
            reason,
            winner: None,
        }
    }

    pub fn abandoned() -> Self {
        Self {
            outcome: Outcome::Aborted,
            reason: EndReason::Abandonment,
            winner: None,
        }
    }
}

/// Evaluates a position in priority order:
///
/// 1. a fallen flag (the other color wins on time)
/// 2. checkmate (the side that just moved wins)
/// 3. stalemate
/// 4. threefold repetition
/// 5. insufficient material
///
/// `side_to_move` is the color to move in the evaluated position, so the
/// side that just moved is its opposite.
pub fn evaluate(
    terminal: Option<Terminal>,
    side_to_move: Color,
    flagged: Option<Color>,
) -> Option<Verdict> {
    if let Some(loser) = flagged {
        return Some(Verdict::win(loser.opposite(), EndReason::TimeForfeit));
    }
    let verdict = match terminal? {
        Terminal::Checkmate => Verdict::win(side_to_move.opposite(), EndReason::Checkmate),
        Terminal::Stalemate => Verdict::draw(EndReason::Stalemate),
        Terminal::ThreefoldRepetition => Verdict::draw(EndReason::ThreefoldRepetition),
        Terminal::InsufficientMaterial => Verdict::draw(EndReason::InsufficientMaterial),
    };
    Some(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluate_ongoing_returns_none() {
        assert_eq!(evaluate(None, Color::White, None), None);
    }

    #[test]
    fn test_evaluate_checkmate_credits_side_that_moved() {
        let v = evaluate(Some(Terminal::Checkmate), Color::White, None).unwrap();
        assert_eq!(v.outcome, Outcome::Win);
        assert_eq!(v.reason, EndReason::Checkmate);
        assert_eq!(v.winner, Some(Color::Black));
    }

    #[test]
    fn test_evaluate_flag_beats_checkmate() {
        let v = evaluate(Some(Terminal::Checkmate), Color::Black, Some(Color::White))
            .unwrap();
        assert_eq!(v.reason, EndReason::TimeForfeit);
        assert_eq!(v.winner, Some(Color::Black));
    }

    #[test]
    fn test_evaluate_draws_have_no_winner() {
        for (terminal, reason) in [
            (Terminal::Stalemate, EndReason::Stalemate),
            (Terminal::ThreefoldRepetition, EndReason::ThreefoldRepetition),
            (Terminal::InsufficientMaterial, EndReason::InsufficientMaterial),
        ] {
            let v = evaluate(Some(terminal), Color::White, None).unwrap();
            assert_eq!(v, Verdict::draw(reason));
        }
    }
}
