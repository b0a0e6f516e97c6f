//! The authoritative state of one room.
//!
//! [`RoomSession`] is a plain synchronous state machine. It owns the
//! position, the move log, the clocks, and the seat assignments, and it is
//! only ever touched from inside its room actor. Every method takes `now`
//! so the actor (or a test) decides what time it is.
//!
//! Mutations queue [`RoomEvent`]s in an outbox instead of sending anything;
//! the actor drains the outbox after each command and hands the events to
//! the dispatcher. A finished game also leaves a [`CompletedGame`] behind
//! for the archive.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kingside_protocol::{
    Color, ConnectionId, GameResult, MembershipView, Move, MoveRequest, Outcome,
    Participant, Role, RoomId, RoomStatus, Snapshot, TimeControl, UserId,
};
use kingside_rules::RulesEngine;
use tokio::time::Instant;

use crate::archive::CompletedGame;
use crate::broadcast::RoomEvent;
use crate::clock::GameClock;
use crate::resolver::{self, Verdict};
use crate::{ArchiveError, MoveError, RoomConfig, RoomInit, SeatPolicy};

/// A join as the room sees it: one connection of one identity asking for a
/// role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub conn: ConnectionId,
    pub user: UserId,
    pub display_name: Option<String>,
    pub role: Role,
    /// Preferred color. `None` takes the first free seat, white first.
    pub color: Option<Color>,
}

impl JoinRequest {
    /// A request to watch.
    pub fn spectator(conn: ConnectionId, user: UserId) -> Self {
        Self {
            conn,
            user,
            display_name: None,
            role: Role::Spectator,
            color: None,
        }
    }

    /// A request for any free seat.
    pub fn player(conn: ConnectionId, user: UserId) -> Self {
        Self {
            role: Role::Player,
            ..Self::spectator(conn, user)
        }
    }

    /// Same request, for a specific color.
    pub fn with_color(mut self, color: Color) -> Self {
        self.color = Some(color);
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

#[derive(Debug)]
struct Seat {
    identity: UserId,
    display_name: String,
    connections: HashSet<ConnectionId>,
    /// Set while every connection of the holder is gone.
    reserved_until: Option<Instant>,
}

impl Seat {
    fn participant(&self, color: Color) -> Participant {
        Participant {
            identity: self.identity.clone(),
            display_name: self.display_name.clone(),
            role: Role::Player,
            color: Some(color),
            connected: !self.connections.is_empty(),
        }
    }
}

#[derive(Debug)]
struct Watcher {
    display_name: String,
    connections: HashSet<ConnectionId>,
}

/// One live or finished game.
pub struct RoomSession<R: RulesEngine> {
    room_id: RoomId,
    engine: Arc<R>,
    policy: Arc<dyn SeatPolicy>,
    reconnect_grace: Duration,

    position: R::Position,
    move_log: Vec<Move>,
    time_control: Option<TimeControl>,
    is_rated: bool,
    status: RoomStatus,
    result: Option<GameResult>,
    created_at: DateTime<Utc>,
    clock: Option<GameClock>,

    seats: [Option<Seat>; 2],
    /// Keyed by identity, so each person is listed once however many
    /// connections they hold.
    spectators: BTreeMap<UserId, Watcher>,
    last_activity: Instant,

    outbox: Vec<RoomEvent>,
    completed: Option<CompletedGame>,
}

impl<R: RulesEngine> RoomSession<R> {
    pub fn new(
        room_id: RoomId,
        engine: Arc<R>,
        policy: Arc<dyn SeatPolicy>,
        config: &RoomConfig,
        init: RoomInit,
        now: Instant,
    ) -> Self {
        Self {
            position: engine.initial_position(),
            room_id,
            engine,
            policy,
            reconnect_grace: config.reconnect_grace,
            move_log: Vec::new(),
            time_control: init.time_control,
            is_rated: init.rated,
            status: RoomStatus::Pending,
            result: None,
            created_at: Utc::now(),
            clock: init.time_control.map(GameClock::new),
            seats: [None, None],
            spectators: BTreeMap::new(),
            last_activity: now,
            outbox: Vec::new(),
            completed: None,
        }
    }

    /// Reopens a game from its archived record.
    ///
    /// The room is already over: it takes spectators only, shows the
    /// archived log and result without clocks, and has nothing left to
    /// archive.
    ///
    /// # Errors
    /// [`ArchiveError::Unreplayable`] if the engine refuses the stored log.
    pub fn restore(
        record: CompletedGame,
        engine: Arc<R>,
        policy: Arc<dyn SeatPolicy>,
        config: &RoomConfig,
        now: Instant,
    ) -> Result<Self, ArchiveError> {
        let position = engine
            .replay(&record.move_log)
            .map_err(|e| ArchiveError::Unreplayable(record.room_id.clone(), e.to_string()))?;
        let status = match record.result.status {
            Outcome::Aborted => RoomStatus::Aborted,
            Outcome::Win | Outcome::Draw => RoomStatus::Completed,
        };
        Ok(Self {
            position,
            room_id: record.room_id,
            engine,
            policy,
            reconnect_grace: config.reconnect_grace,
            move_log: record.move_log,
            time_control: record.time_control,
            is_rated: record.is_rated,
            status,
            result: Some(record.result),
            created_at: Utc::now(),
            // Remaining times are not archived.
            clock: None,
            seats: [None, None],
            spectators: BTreeMap::new(),
            last_activity: now,
            outbox: Vec::new(),
            completed: None,
        })
    }

    // -----------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn status(&self) -> RoomStatus {
        self.status
    }

    pub fn result(&self) -> Option<&GameResult> {
        self.result.as_ref()
    }

    pub fn move_log(&self) -> &[Move] {
        &self.move_log
    }

    pub fn position(&self) -> &R::Position {
        &self.position
    }

    /// The color `user` holds, connected or reserved.
    pub fn seat_of(&self, user: &UserId) -> Option<Color> {
        Color::ALL.into_iter().find(|c| {
            self.seats[c.index()]
                .as_ref()
                .is_some_and(|s| &s.identity == user)
        })
    }

    /// Live connections across players and spectators.
    pub fn connection_count(&self) -> usize {
        let seated: usize = self.seats.iter().flatten().map(|s| s.connections.len()).sum();
        let watching: usize = self.spectators.values().map(|w| w.connections.len()).sum();
        seated + watching
    }

    /// Time since the last join, leave, or move.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// A consistent read of the whole game at `now`.
    pub fn snapshot(&self, now: Instant) -> Snapshot {
        Snapshot {
            room_id: self.room_id.clone(),
            position: self.engine.render(&self.position),
            side_to_move: self.engine.side_to_move(&self.position),
            move_log: self.move_log.clone(),
            status: self.status,
            is_rated: self.is_rated,
            time_control: self.time_control,
            clocks: self.clock.as_ref().map(|c| c.view(now)),
            result: self.result.clone(),
        }
    }

    pub fn membership(&self) -> MembershipView {
        let seat = |c: Color| self.seats[c.index()].as_ref().map(|s| s.participant(c));
        MembershipView {
            room_id: self.room_id.clone(),
            white: seat(Color::White),
            black: seat(Color::Black),
            spectators: self
                .spectators
                .iter()
                .map(|(identity, w)| Participant {
                    identity: identity.clone(),
                    display_name: w.display_name.clone(),
                    role: Role::Spectator,
                    color: None,
                    connected: true,
                })
                .collect(),
        }
    }

    /// The earliest moment the room has to wake up on its own: a flag about
    /// to fall or a seat reservation about to lapse.
    pub fn next_deadline(&self) -> Option<Instant> {
        let flag = self
            .clock
            .as_ref()
            .filter(|_| !self.status.is_terminal())
            .and_then(GameClock::deadline);
        let reservations = self.seats.iter().flatten().filter_map(|s| s.reserved_until);
        flag.into_iter().chain(reservations).min()
    }

    /// Events queued by mutations since the last drain, oldest first.
    pub fn drain_events(&mut self) -> Vec<RoomEvent> {
        std::mem::take(&mut self.outbox)
    }

    /// The completion record, once, after the game ends.
    pub fn take_completed(&mut self) -> Option<CompletedGame> {
        self.completed.take()
    }

    // -----------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------

    /// Adds one connection to the room and returns the role it got.
    ///
    /// Someone who already holds a seat always gets it back. A request for
    /// a seat is granted if a matching one is free, the game is not over,
    /// and the seat policy agrees; otherwise the joiner watches.
    pub fn join(&mut self, req: &JoinRequest, now: Instant) -> Participant {
        self.last_activity = now;
        let participant = if let Some(color) = self.seat_of(&req.user) {
            self.resume_seat(color, req)
        } else if let Some(color) = self.free_seat_for(req) {
            self.take_seat(color, req)
        } else {
            self.watch(req)
        };
        self.outbox
            .push(RoomEvent::MembershipChanged(self.membership()));
        participant
    }

    /// Removes one connection. Returns `false` if it was not in the room.
    ///
    /// A player whose last connection leaves keeps the seat, marked
    /// disconnected, until the reconnection grace runs out. Once the game
    /// is over there is nothing to hold, so the seat is vacated at once.
    pub fn leave(&mut self, conn: ConnectionId, user: &UserId, now: Instant) -> bool {
        self.last_activity = now;
        let left = match self.seat_of(user) {
            Some(color) => self.leave_seat(color, conn, now),
            None => self.stop_watching(conn, user),
        };
        if left {
            self.outbox
                .push(RoomEvent::MembershipChanged(self.membership()));
        }
        left
    }

    fn resume_seat(&mut self, color: Color, req: &JoinRequest) -> Participant {
        let Some(seat) = self.seats[color.index()].as_mut() else {
            return self.watch(req);
        };
        let reconnected = seat.reserved_until.take().is_some();
        seat.connections.insert(req.conn);
        if let Some(name) = &req.display_name {
            seat.display_name = name.clone();
        }
        tracing::info!(
            room_id = %self.room_id,
            user = %req.user,
            %color,
            reconnected,
            "player resumed seat"
        );
        seat.participant(color)
    }

    fn free_seat_for(&self, req: &JoinRequest) -> Option<Color> {
        if req.role != Role::Player || !self.status.accepts_players() {
            return None;
        }
        let wanted = req.color.map_or_else(|| Color::ALL.to_vec(), |c| vec![c]);
        let granted = wanted.into_iter().find(|c| {
            self.seats[c.index()].is_none()
                && self
                    .policy
                    .may_take_seat(&self.room_id, &req.user, *c, self.status)
        });
        if granted.is_none() {
            tracing::debug!(
                room_id = %self.room_id,
                user = %req.user,
                requested = ?req.color,
                "no seat available, joining as spectator"
            );
        }
        granted
    }

    fn take_seat(&mut self, color: Color, req: &JoinRequest) -> Participant {
        // A spectator taking a seat brings all of their connections along.
        let watcher = self.spectators.remove(&req.user);
        let display_name = req
            .display_name
            .clone()
            .or_else(|| watcher.as_ref().map(|w| w.display_name.clone()))
            .unwrap_or_else(|| req.user.to_string());
        let mut connections = watcher.map(|w| w.connections).unwrap_or_default();
        connections.insert(req.conn);

        let seat = Seat {
            identity: req.user.clone(),
            display_name,
            connections,
            reserved_until: None,
        };
        let participant = seat.participant(color);
        self.seats[color.index()] = Some(seat);
        tracing::info!(
            room_id = %self.room_id,
            user = %req.user,
            %color,
            "player seated"
        );
        participant
    }

    fn watch(&mut self, req: &JoinRequest) -> Participant {
        let watcher = self
            .spectators
            .entry(req.user.clone())
            .or_insert_with(|| Watcher {
                display_name: req.user.to_string(),
                connections: HashSet::new(),
            });
        if let Some(name) = &req.display_name {
            watcher.display_name = name.clone();
        }
        watcher.connections.insert(req.conn);
        tracing::debug!(room_id = %self.room_id, user = %req.user, "spectator joined");
        Participant {
            identity: req.user.clone(),
            display_name: watcher.display_name.clone(),
            role: Role::Spectator,
            color: None,
            connected: true,
        }
    }

    fn leave_seat(&mut self, color: Color, conn: ConnectionId, now: Instant) -> bool {
        let terminal = self.status.is_terminal();
        let grace = self.reconnect_grace;
        let Some(seat) = self.seats[color.index()].as_mut() else {
            return false;
        };
        if !seat.connections.remove(&conn) {
            return false;
        }
        if !seat.connections.is_empty() {
            return true;
        }

        if terminal {
            tracing::info!(room_id = %self.room_id, %color, "player left finished game");
            self.seats[color.index()] = None;
        } else {
            seat.reserved_until = Some(now + grace);
            tracing::info!(
                room_id = %self.room_id,
                user = %seat.identity,
                %color,
                grace_secs = grace.as_secs(),
                "player disconnected, seat reserved"
            );
        }
        true
    }

    fn stop_watching(&mut self, conn: ConnectionId, user: &UserId) -> bool {
        let Some(watcher) = self.spectators.get_mut(user) else {
            return false;
        };
        let removed = watcher.connections.remove(&conn);
        if watcher.connections.is_empty() {
            self.spectators.remove(user);
        }
        removed
    }

    /// Releases every seat whose reservation has lapsed at `now`. The game
    /// itself carries on; the seat simply becomes free.
    pub fn expire_seats(&mut self, now: Instant) {
        let mut released = false;
        for color in Color::ALL {
            let lapsed = self.seats[color.index()]
                .as_ref()
                .and_then(|s| s.reserved_until)
                .is_some_and(|until| until <= now);
            if lapsed {
                if let Some(seat) = self.seats[color.index()].take() {
                    tracing::info!(
                        room_id = %self.room_id,
                        user = %seat.identity,
                        %color,
                        "reconnection grace expired, seat released"
                    );
                }
                released = true;
            }
        }
        if released {
            self.outbox
                .push(RoomEvent::MembershipChanged(self.membership()));
        }
    }

    // -----------------------------------------------------------------
    // Game
    // -----------------------------------------------------------------

    /// Plays `mv` for `user`.
    ///
    /// Resubmitting the move at the tail of the log, by the color that
    /// played it, is a no-op that returns the current snapshot. This is
    /// checked before anything else so a retried delivery never fails.
    ///
    /// # Errors
    /// - [`MoveError::GameAlreadyOver`] once a result exists (including a
    ///   flag that fell before this move arrived)
    /// - [`MoveError::NotYourTurn`] if `user` does not hold the color to
    ///   move
    /// - [`MoveError::IllegalMove`] if the rules engine refuses it
    pub fn submit_move(
        &mut self,
        user: &UserId,
        mv: &MoveRequest,
        now: Instant,
    ) -> Result<Snapshot, MoveError> {
        let seat = self.seat_of(user);
        if let (Some(tail), Some(color)) = (self.move_log.last(), seat) {
            if tail.color == color && mv.same_as(tail) {
                tracing::debug!(
                    room_id = %self.room_id,
                    %user,
                    mv = %tail.algebraic,
                    "duplicate move submission"
                );
                return Ok(self.snapshot(now));
            }
        }

        self.check_clock(now);
        if self.status.is_terminal() {
            return Err(MoveError::GameAlreadyOver);
        }

        let side = self.engine.side_to_move(&self.position);
        if seat != Some(side) {
            return Err(MoveError::NotYourTurn);
        }

        let next = self
            .engine
            .apply(&self.position, mv)
            .map_err(|e| MoveError::IllegalMove(e.to_string()))?;

        let ply = u32::try_from(self.move_log.len() + 1).unwrap_or(u32::MAX);
        self.move_log.push(Move {
            ply,
            color: side,
            from: mv.from.to_ascii_lowercase(),
            to: mv.to.to_ascii_lowercase(),
            promotion: mv.promotion.map(|p| p.to_ascii_lowercase()),
            algebraic: mv.uci(),
            applied_at: Utc::now(),
        });
        self.position = next;
        self.last_activity = now;
        if self.status == RoomStatus::Pending {
            self.status = RoomStatus::Ongoing;
            tracing::info!(room_id = %self.room_id, "game started");
        }
        if let Some(clock) = &mut self.clock {
            clock.press(side, now);
        }
        tracing::debug!(room_id = %self.room_id, %user, ply, mv = %mv.uci(), "move applied");

        let verdict = resolver::evaluate(
            self.engine.terminal_status(&self.position),
            self.engine.side_to_move(&self.position),
            self.clock.as_ref().and_then(|c| c.flagged(now)),
        );
        let result = verdict.map(|v| self.conclude(v, now));

        let snapshot = self.snapshot(now);
        self.outbox.push(RoomEvent::MoveApplied(snapshot.clone()));
        if let Some(result) = result {
            self.announce(result);
        }
        Ok(snapshot)
    }

    /// `user` concedes; the other color wins.
    ///
    /// # Errors
    /// [`MoveError::GameAlreadyOver`] after a result, and
    /// [`MoveError::NotYourTurn`] if `user` holds no seat.
    pub fn resign(&mut self, user: &UserId, now: Instant) -> Result<Snapshot, MoveError> {
        self.check_clock(now);
        if self.status.is_terminal() {
            return Err(MoveError::GameAlreadyOver);
        }
        let color = self.seat_of(user).ok_or(MoveError::NotYourTurn)?;
        self.last_activity = now;

        let result = self.conclude(
            Verdict::win(color.opposite(), kingside_protocol::EndReason::Resignation),
            now,
        );
        self.announce(result);
        Ok(self.snapshot(now))
    }

    /// Gives up on an abandoned room. Returns `false` if it was already
    /// over.
    pub fn abort(&mut self, now: Instant) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let result = self.conclude(Verdict::abandoned(), now);
        self.announce(result);
        true
    }

    /// Ends the game if the running flag has fallen.
    pub fn check_clock(&mut self, now: Instant) {
        if self.status.is_terminal() {
            return;
        }
        let Some(flagged) = self.clock.as_ref().and_then(|c| c.flagged(now)) else {
            return;
        };
        let side = self.engine.side_to_move(&self.position);
        if let Some(verdict) = resolver::evaluate(None, side, Some(flagged)) {
            let result = self.conclude(verdict, now);
            self.announce(result);
        }
    }

    /// Everything time-driven: flags and seat reservations.
    pub fn on_deadline(&mut self, now: Instant) {
        self.check_clock(now);
        self.expire_seats(now);
    }

    fn announce(&mut self, result: GameResult) {
        self.outbox.push(RoomEvent::GameOver {
            room_id: self.room_id.clone(),
            result,
        });
    }

    /// Records the result and freezes the game.
    fn conclude(&mut self, verdict: Verdict, now: Instant) -> GameResult {
        let winner = verdict.winner.and_then(|color| {
            match &self.seats[color.index()] {
                Some(seat) => Some(seat.identity.clone()),
                None => {
                    tracing::error!(
                        room_id = %self.room_id,
                        %color,
                        reason = ?verdict.reason,
                        "InvariantViolation: winning color has no player"
                    );
                    None
                }
            }
        });

        let ended_at = Utc::now();
        let result = GameResult {
            status: verdict.outcome,
            reason: verdict.reason,
            winner,
            ended_at,
            duration_seconds: u64::try_from((ended_at - self.created_at).num_seconds())
                .unwrap_or(0),
        };

        let next = match verdict.outcome {
            Outcome::Aborted => RoomStatus::Aborted,
            Outcome::Win | Outcome::Draw => RoomStatus::Completed,
        };
        debug_assert!(self.status.can_transition_to(next));
        self.status = next;
        if let Some(clock) = &mut self.clock {
            clock.stop(now);
        }
        self.result = Some(result.clone());

        let view = self.membership();
        let participants = view
            .white
            .into_iter()
            .chain(view.black)
            .chain(view.spectators)
            .collect();
        self.completed = Some(CompletedGame {
            room_id: self.room_id.clone(),
            final_position: self.engine.render(&self.position),
            move_log: self.move_log.clone(),
            result: result.clone(),
            participants,
            time_control: self.time_control,
            is_rated: self.is_rated,
        });

        tracing::info!(
            room_id = %self.room_id,
            status = %next,
            reason = ?result.reason,
            winner = ?result.winner,
            plies = self.move_log.len(),
            "game over"
        );
        result
    }
}
