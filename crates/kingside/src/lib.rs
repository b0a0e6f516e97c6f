//! # Kingside
//!
//! Live multiplayer chess rooms over WebSocket.
//!
//! Two players play, any number of spectators watch, every accepted move is
//! broadcast to the whole room, and the room alone decides how the game
//! ended. The server wires the layers together:
//!
//! ```text
//! WebSocket → handshake/auth → connection registry → room store → room actors
//! ```
//!
//! Bring a [`RulesEngine`](kingside_rules::RulesEngine) (or use the bundled
//! [`StandardChess`](kingside_rules::StandardChess)) and an
//! [`Authenticator`] that maps your app's tokens to user ids.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kingside::prelude::*;
//!
//! # async fn run() -> Result<(), KingsideError> {
//! let config = ServerConfig::load("kingside.toml")?;
//! let server = KingsideServerBuilder::from_config(config)
//!     .build(StandardChess, DevAuthenticator)
//!     .await?;
//! server.run().await
//! # }
//! ```

mod auth;
mod config;
mod error;
mod handler;
mod registry;
mod server;

pub use auth::{AuthError, Authenticator, DevAuthenticator};
pub use config::{ConfigError, ServerConfig};
pub use error::KingsideError;
pub use registry::{ConnectionRegistry, Departed};
pub use server::{KingsideServer, KingsideServerBuilder};

/// Everything needed to embed a server.
pub mod prelude {
    pub use crate::{
        AuthError, Authenticator, DevAuthenticator, KingsideError, KingsideServer,
        KingsideServerBuilder, ServerConfig,
    };
    pub use kingside_protocol::{
        ClientMessage, Color, ErrorCode, MoveRequest, Role, RoomId, ServerFrame, ServerMessage,
        TimeControl, UserId, PROTOCOL_VERSION,
    };
    pub use kingside_room::{GameArchive, JsonDirArchive, MemoryArchive, SeatPolicy};
    pub use kingside_rules::{RulesEngine, StandardChess};
}
