//! Room lifecycle management for Kingside.
//!
//! Each room runs as an isolated Tokio task (actor model) that owns one
//! game: position, move log, clocks, seats, and subscribers. All mutations
//! of a room happen inside its actor, in arrival order, and broadcasts go
//! out right after the mutation they describe.
//!
//! # Key types
//!
//! - [`RoomStore`] creates rooms lazily, hands out handles, sweeps idle
//!   rooms
//! - [`RoomHandle`] sends commands to a running room actor
//! - [`RoomSession`] the synchronous state machine inside each actor
//! - [`RoomConfig`] grace period, busy timeout, idle timeout
//! - [`SeatPolicy`] decides who may take a free seat
//! - [`GameArchive`] where finished games are written

mod archive;
mod broadcast;
mod clock;
mod config;
mod error;
mod policy;
pub mod resolver;
mod room;
mod session;
mod store;

pub use archive::{CompletedGame, GameArchive, JsonDirArchive, MemoryArchive};
pub use broadcast::{ConnectionSender, RoomEvent};
pub use clock::GameClock;
pub use config::{RoomConfig, RoomInit};
pub use error::{ArchiveError, MoveError, RoomError};
pub use policy::{OpenSeating, SeatPolicy};
pub use room::{Joined, RoomHandle};
pub use session::{JoinRequest, RoomSession};
pub use store::RoomStore;
