//! Unified error type for the Kingside server.

use kingside_protocol::ProtocolError;
use kingside_room::{ArchiveError, RoomError};
use kingside_transport::TransportError;

use crate::auth::AuthError;
use crate::config::ConfigError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant generates the `From` impls, so
/// `?` converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum KingsideError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, unexpected message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The handshake token was rejected.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// A room-level error (busy, unavailable, rejected move).
    #[error(transparent)]
    Room(#[from] RoomError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
