//! Error types for the protocol layer.
//!
//! Each crate in Kingside defines its own error enum. A `ProtocolError`
//! always means the bytes or identifiers coming off the wire were bad,
//! never that a room or connection misbehaved.

/// Errors that can occur while encoding, decoding, or validating wire data.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization of an outbound frame failed.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// An inbound frame was not valid JSON or did not match any known
    /// client message shape.
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// A room identifier was empty, too long, or contained characters
    /// outside `[A-Za-z0-9_-]`. Rejected before any room lookup happens.
    #[error("invalid room id: {0:?}")]
    InvalidRoomId(String),

    /// The message decoded fine but breaks a protocol rule (for example a
    /// promotion piece that is not one of `q`, `r`, `b`, `n`).
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
