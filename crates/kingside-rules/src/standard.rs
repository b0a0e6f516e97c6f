//! Standard chess, backed by the `chess` crate.
//!
//! The `chess` crate's `Board` knows about check, mate, and stalemate, but
//! not about history. [`ChessPosition`] pairs the board with the hashes of
//! every position reached so far, which is what repetition detection needs.

use std::str::FromStr;

use chess::{Board, BoardStatus, ChessMove, MoveGen, Piece, Square};
use kingside_protocol::{Color, MoveRequest};

use crate::{RulesEngine, RulesError, Terminal};

/// A board plus the Zobrist hashes of every position in the game so far,
/// including the current one.
#[derive(Debug, Clone)]
pub struct ChessPosition {
    board: Board,
    history: Vec<u64>,
}

impl ChessPosition {
    fn start(board: Board) -> Self {
        Self {
            history: vec![board.get_hash()],
            board,
        }
    }

    /// The underlying board.
    pub fn board(&self) -> &Board {
        &self.board
    }

    /// How many times the current position has occurred.
    pub fn occurrences(&self) -> usize {
        let current = self.board.get_hash();
        self.history.iter().filter(|h| **h == current).count()
    }
}

/// The standard chess rules engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardChess;

impl StandardChess {
    /// Starts a game from an arbitrary FEN instead of the initial position.
    /// Mostly useful for tests and puzzles.
    ///
    /// # Errors
    /// Returns [`RulesError::InvalidPosition`] if the FEN doesn't parse.
    pub fn position_from_fen(&self, fen: &str) -> Result<ChessPosition, RulesError> {
        let board = Board::from_str(fen)
            .map_err(|e| RulesError::InvalidPosition(format!("{e:?}")))?;
        Ok(ChessPosition::start(board))
    }
}

impl RulesEngine for StandardChess {
    type Position = ChessPosition;

    fn initial_position(&self) -> ChessPosition {
        ChessPosition::start(Board::default())
    }

    fn side_to_move(&self, position: &ChessPosition) -> Color {
        match position.board.side_to_move() {
            chess::Color::White => Color::White,
            chess::Color::Black => Color::Black,
        }
    }

    fn legal_moves(&self, position: &ChessPosition) -> Vec<MoveRequest> {
        MoveGen::new_legal(&position.board)
            .map(|m| MoveRequest {
                from: m.get_source().to_string(),
                to: m.get_dest().to_string(),
                promotion: m.get_promotion().map(piece_char),
            })
            .collect()
    }

    fn apply(
        &self,
        position: &ChessPosition,
        mv: &MoveRequest,
    ) -> Result<ChessPosition, RulesError> {
        let chess_move = parse_move(mv)?;
        if !position.board.legal(chess_move) {
            return Err(RulesError::IllegalMove(mv.uci()));
        }

        let board = position.board.make_move_new(chess_move);
        let mut history = position.history.clone();
        history.push(board.get_hash());
        Ok(ChessPosition { board, history })
    }

    fn terminal_status(&self, position: &ChessPosition) -> Option<Terminal> {
        match position.board.status() {
            BoardStatus::Checkmate => Some(Terminal::Checkmate),
            BoardStatus::Stalemate => Some(Terminal::Stalemate),
            BoardStatus::Ongoing if position.occurrences() >= 3 => {
                Some(Terminal::ThreefoldRepetition)
            }
            BoardStatus::Ongoing if insufficient_material(&position.board) => {
                Some(Terminal::InsufficientMaterial)
            }
            BoardStatus::Ongoing => None,
        }
    }

    fn render(&self, position: &ChessPosition) -> String {
        position.board.to_string()
    }
}

fn parse_move(mv: &MoveRequest) -> Result<ChessMove, RulesError> {
    let square = |text: &str| {
        Square::from_str(&text.to_ascii_lowercase())
            .map_err(|_| RulesError::MalformedMove(format!("bad square {text:?}")))
    };
    let promotion = match mv.promotion.map(|c| c.to_ascii_lowercase()) {
        None => None,
        Some('q') => Some(Piece::Queen),
        Some('r') => Some(Piece::Rook),
        Some('b') => Some(Piece::Bishop),
        Some('n') => Some(Piece::Knight),
        Some(other) => {
            return Err(RulesError::MalformedMove(format!(
                "bad promotion piece {other:?}"
            )));
        }
    };
    Ok(ChessMove::new(square(&mv.from)?, square(&mv.to)?, promotion))
}

fn piece_char(piece: Piece) -> char {
    match piece {
        Piece::Pawn => 'p',
        Piece::Knight => 'n',
        Piece::Bishop => 'b',
        Piece::Rook => 'r',
        Piece::Queen => 'q',
        Piece::King => 'k',
    }
}

/// Bare kings, a single minor piece, or bishops that all stand on one
/// square color.
fn insufficient_material(board: &Board) -> bool {
    let heavy = *board.pieces(Piece::Pawn)
        | *board.pieces(Piece::Rook)
        | *board.pieces(Piece::Queen);
    if heavy.popcnt() > 0 {
        return false;
    }

    let knights = *board.pieces(Piece::Knight);
    let bishops = *board.pieces(Piece::Bishop);
    if knights.popcnt() + bishops.popcnt() <= 1 {
        return true;
    }
    if knights.popcnt() > 0 {
        return false;
    }

    let mut shades = bishops
        .map(|sq| (sq.get_rank().to_index() + sq.get_file().to_index()) % 2);
    match shades.next() {
        Some(first) => shades.all(|shade| shade == first),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn play(engine: &StandardChess, moves: &[&str]) -> ChessPosition {
        let mut pos = engine.initial_position();
        for uci in moves {
            let req = MoveRequest::from_uci(uci).unwrap();
            pos = engine
                .apply(&pos, &req)
                .unwrap_or_else(|e| panic!("{uci} should apply: {e}"));
        }
        pos
    }

    #[test]
    fn test_initial_position_has_twenty_moves_white_to_move() {
        let engine = StandardChess;
        let pos = engine.initial_position();
        assert_eq!(engine.legal_moves(&pos).len(), 20);
        assert_eq!(engine.side_to_move(&pos), Color::White);
        assert!(engine
            .render(&pos)
            .starts_with("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w"));
        assert_eq!(engine.terminal_status(&pos), None);
    }

    #[test]
    fn test_apply_legal_move_flips_side_and_keeps_original() {
        let engine = StandardChess;
        let start = engine.initial_position();
        let next = engine.apply(&start, &MoveRequest::new("e2", "e4")).unwrap();

        assert_eq!(engine.side_to_move(&next), Color::Black);
        assert_eq!(engine.side_to_move(&start), Color::White, "apply must not mutate");
    }

    #[test]
    fn test_apply_illegal_move_rejected() {
        let engine = StandardChess;
        let start = engine.initial_position();
        let result = engine.apply(&start, &MoveRequest::new("e2", "e5"));
        assert!(matches!(result, Err(RulesError::IllegalMove(m)) if m == "e2e5"));
    }

    #[test]
    fn test_apply_malformed_square_rejected() {
        let engine = StandardChess;
        let start = engine.initial_position();
        let result = engine.apply(&start, &MoveRequest::new("z9", "e4"));
        assert!(matches!(result, Err(RulesError::MalformedMove(_))));
    }

    #[test]
    fn test_fools_mate_is_checkmate() {
        let engine = StandardChess;
        let pos = play(&engine, &["f2f3", "e7e5", "g2g4", "d8h4"]);
        assert_eq!(engine.terminal_status(&pos), Some(Terminal::Checkmate));
        assert!(engine.legal_moves(&pos).is_empty());
    }

    #[test]
    fn test_stalemate_detected() {
        let engine = StandardChess;
        let pos = engine
            .position_from_fen("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1")
            .unwrap();
        assert_eq!(engine.terminal_status(&pos), Some(Terminal::Stalemate));
    }

    #[test]
    fn test_threefold_repetition_after_knight_shuffle() {
        let engine = StandardChess;
        let shuffle = ["g1f3", "g8f6", "f3g1", "f6g8"];

        let twice = play(&engine, &shuffle);
        assert_eq!(twice.occurrences(), 2);
        assert_eq!(engine.terminal_status(&twice), None);

        let thrice: Vec<&str> = shuffle.iter().chain(shuffle.iter()).copied().collect();
        let pos = play(&engine, &thrice);
        assert_eq!(
            engine.terminal_status(&pos),
            Some(Terminal::ThreefoldRepetition)
        );
    }

    #[test]
    fn test_bare_kings_are_insufficient_material() {
        let engine = StandardChess;
        let pos = engine.position_from_fen("8/8/4k3/8/8/4K3/8/8 w - - 0 1").unwrap();
        assert_eq!(
            engine.terminal_status(&pos),
            Some(Terminal::InsufficientMaterial)
        );
    }

    #[test]
    fn test_same_colored_bishops_are_insufficient_material() {
        let engine = StandardChess;
        let same = engine
            .position_from_fen("8/8/4k3/8/8/b3K3/8/2B5 w - - 0 1")
            .unwrap();
        assert_eq!(
            engine.terminal_status(&same),
            Some(Terminal::InsufficientMaterial)
        );

        let opposite = engine
            .position_from_fen("8/8/4k3/8/8/1b2K3/8/2B5 w - - 0 1")
            .unwrap();
        assert_eq!(engine.terminal_status(&opposite), None);
    }

    #[test]
    fn test_promotion_requires_piece() {
        let engine = StandardChess;
        let pos = engine.position_from_fen("8/P6k/8/8/8/8/8/K7 w - - 0 1").unwrap();

        assert!(engine.apply(&pos, &MoveRequest::new("a7", "a8")).is_err());
        let promoted = engine
            .apply(&pos, &MoveRequest::new("a7", "a8").promoting('q'))
            .unwrap();
        assert!(engine.render(&promoted).starts_with("Q6k/"));
    }

    #[test]
    fn test_legal_moves_report_promotions() {
        let engine = StandardChess;
        let pos = engine.position_from_fen("8/P6k/8/8/8/8/8/K7 w - - 0 1").unwrap();
        let promos: Vec<_> = engine
            .legal_moves(&pos)
            .into_iter()
            .filter(|m| m.from == "a7")
            .map(|m| m.uci())
            .collect();
        assert_eq!(promos.len(), 4);
        assert!(promos.contains(&"a7a8q".to_string()));
        assert!(promos.contains(&"a7a8n".to_string()));
    }

    #[test]
    fn test_replay_matches_incremental_play() {
        use chrono::Utc;
        use kingside_protocol::Move;

        let engine = StandardChess;
        let moves = ["e2e4", "e7e5", "g1f3", "b8c6"];
        let incremental = play(&engine, &moves);

        let log: Vec<Move> = moves
            .iter()
            .enumerate()
            .map(|(i, uci)| {
                let req = MoveRequest::from_uci(uci).unwrap();
                Move {
                    ply: i as u32 + 1,
                    color: if i % 2 == 0 { Color::White } else { Color::Black },
                    from: req.from,
                    to: req.to,
                    promotion: None,
                    algebraic: uci.to_string(),
                    applied_at: Utc::now(),
                }
            })
            .collect();
        let replayed = engine.replay(&log).unwrap();
        assert_eq!(engine.render(&replayed), engine.render(&incremental));
    }
}
