//! Who may take a free seat.

use kingside_protocol::{Color, RoomId, RoomStatus, UserId};

/// Authorization hook consulted whenever a join asks for a free seat.
///
/// Refusal is never an error: the joiner is silently seated as a spectator.
/// Rejoining a seat you already hold does not consult the policy.
///
/// Closures of the right shape implement this trait, which is handy in
/// tests:
///
/// ```
/// use kingside_protocol::{Color, RoomId, RoomStatus, UserId};
/// use kingside_room::SeatPolicy;
///
/// let only_before_first_move =
///     |_: &RoomId, _: &UserId, _: Color, status: RoomStatus| {
///         status == RoomStatus::Pending
///     };
/// assert!(only_before_first_move.may_take_seat(
///     &RoomId::parse("r1").unwrap(),
///     &UserId::new("u1"),
///     Color::White,
///     RoomStatus::Pending,
/// ));
/// ```
pub trait SeatPolicy: Send + Sync + 'static {
    fn may_take_seat(
        &self,
        room_id: &RoomId,
        user: &UserId,
        color: Color,
        status: RoomStatus,
    ) -> bool;
}

/// Any free seat goes to whoever asks first, mid-game included.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenSeating;

impl SeatPolicy for OpenSeating {
    fn may_take_seat(&self, _: &RoomId, _: &UserId, _: Color, _: RoomStatus) -> bool {
        true
    }
}

impl<F> SeatPolicy for F
where
    F: Fn(&RoomId, &UserId, Color, RoomStatus) -> bool + Send + Sync + 'static,
{
    fn may_take_seat(
        &self,
        room_id: &RoomId,
        user: &UserId,
        color: Color,
        status: RoomStatus,
    ) -> bool {
        self(room_id, user, color, status)
    }
}
