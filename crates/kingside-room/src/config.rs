//! Room policy knobs and per-room creation parameters.

use std::time::Duration;

use kingside_protocol::TimeControl;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RoomConfig
// ---------------------------------------------------------------------------

/// Policy shared by every room in a store.
///
/// The server fills this from its own configuration file; tests usually
/// shorten the timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomConfig {
    /// How long a disconnected player's seat stays reserved before it is
    /// released to anyone else.
    pub reconnect_grace: Duration,

    /// How long a request may wait for the room actor (queueing plus
    /// processing) before the caller gets `RoomBusy`.
    pub busy_timeout: Duration,

    /// How long a non-terminal room with no connections may sit untouched
    /// before the sweeper aborts it for abandonment.
    pub idle_timeout: Duration,

    /// Capacity of each room's command channel.
    pub channel_size: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            reconnect_grace: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(2),
            idle_timeout: Duration::from_secs(600),
            channel_size: 64,
        }
    }
}

// ---------------------------------------------------------------------------
// RoomInit
// ---------------------------------------------------------------------------

/// Parameters that only matter when a room is first created.
///
/// Whoever joins an unseen room id first decides these. Later joins pass
/// their own `RoomInit` too, and it is ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInit {
    /// `None` means an untimed game.
    pub time_control: Option<TimeControl>,
    pub rated: bool,
}

impl RoomInit {
    /// An untimed, unrated room.
    pub fn casual() -> Self {
        Self::default()
    }

    /// A timed room.
    pub fn timed(initial_secs: u64, increment_secs: u64) -> Self {
        Self {
            time_control: Some(TimeControl::new(initial_secs, increment_secs)),
            rated: false,
        }
    }

    /// Same parameters, marked rated.
    pub fn rated(mut self) -> Self {
        self.rated = true;
        self
    }
}
