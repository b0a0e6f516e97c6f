//! Property tests over random legal games, driven straight through
//! `RoomSession` (no actor, no runtime).

use std::sync::Arc;

use kingside_protocol::{Color, ConnectionId, RoomId, UserId};
use kingside_room::{JoinRequest, OpenSeating, RoomConfig, RoomInit, RoomSession};
use kingside_rules::{RulesEngine, StandardChess};
use proptest::prelude::*;
use proptest::sample::Index;
use tokio::time::Instant;

fn seated_session(engine: &Arc<StandardChess>) -> RoomSession<StandardChess> {
    let now = Instant::now();
    let mut session = RoomSession::new(
        RoomId::parse("prop").unwrap(),
        Arc::clone(engine),
        Arc::new(OpenSeating),
        &RoomConfig::default(),
        RoomInit::casual(),
        now,
    );
    session.join(&JoinRequest::player(ConnectionId::new(1), UserId::new("w")), now);
    session.join(&JoinRequest::player(ConnectionId::new(2), UserId::new("b")), now);
    session
}

fn mover(color: Color) -> UserId {
    match color {
        Color::White => UserId::new("w"),
        Color::Black => UserId::new("b"),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// The stored position is always what replaying the log produces.
    #[test]
    fn prop_position_equals_replay_of_log(picks in prop::collection::vec(any::<Index>(), 1..80)) {
        let engine = Arc::new(StandardChess);
        let mut session = seated_session(&engine);
        let now = Instant::now();

        for pick in picks {
            if session.status().is_terminal() {
                break;
            }
            let legal = engine.legal_moves(session.position());
            let chosen = pick.get(&legal).clone();
            let user = mover(engine.side_to_move(session.position()));

            let snap = session.submit_move(&user, &chosen, now).unwrap();
            let replayed = engine.replay(&snap.move_log).unwrap();
            prop_assert_eq!(engine.render(&replayed), snap.position.clone());
            prop_assert_eq!(snap.move_log.last().map(|m| m.ply as usize), Some(snap.ply()));
        }
    }

    /// Resubmitting the move just played returns the same snapshot and
    /// never appends twice, even when that move ended the game.
    #[test]
    fn prop_resubmission_is_idempotent(picks in prop::collection::vec(any::<Index>(), 1..60)) {
        let engine = Arc::new(StandardChess);
        let mut session = seated_session(&engine);
        let now = Instant::now();

        for pick in picks {
            if session.status().is_terminal() {
                break;
            }
            let legal = engine.legal_moves(session.position());
            let chosen = pick.get(&legal).clone();
            let user = mover(engine.side_to_move(session.position()));

            let first = session.submit_move(&user, &chosen, now).unwrap();
            let again = session.submit_move(&user, &chosen, now).unwrap();
            prop_assert_eq!(&first, &again);
            prop_assert_eq!(session.move_log().len(), first.ply());
        }
    }
}
