//! Framing: how messages become bytes on a connection.
//!
//! Outbound messages are wrapped in a [`ServerFrame`] carrying a
//! per-connection sequence number, so a client can tell that it has seen
//! every frame in order. Inbound frames are bare [`ClientMessage`] JSON.

use serde::{Deserialize, Serialize};

use crate::{ClientMessage, ProtocolError, ServerMessage};

/// The current protocol version. Clients must send this in `Hello`.
pub const PROTOCOL_VERSION: u32 = 1;

/// One outbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFrame {
    /// Starts at 0 for the handshake reply and increases by one per frame.
    pub seq: u64,
    pub message: ServerMessage,
}

/// Serializes an outbound message with its sequence number.
///
/// # Errors
/// Returns [`ProtocolError::Encode`] if serialization fails.
pub fn encode_server(seq: u64, message: ServerMessage) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(&ServerFrame { seq, message }).map_err(ProtocolError::Encode)
}

/// Parses an inbound frame.
///
/// # Errors
/// Returns [`ProtocolError::Decode`] for malformed JSON or unknown message
/// types.
pub fn decode_client(data: &[u8]) -> Result<ClientMessage, ProtocolError> {
    serde_json::from_slice(data).map_err(ProtocolError::Decode)
}

/// Serializes a client message. Used by test clients and tooling.
///
/// # Errors
/// Returns [`ProtocolError::Encode`] if serialization fails.
pub fn encode_client(message: &ClientMessage) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(message).map_err(ProtocolError::Encode)
}

/// Parses an outbound frame. Used by test clients and tooling.
///
/// # Errors
/// Returns [`ProtocolError::Decode`] if the bytes are not a `ServerFrame`.
pub fn decode_server(data: &[u8]) -> Result<ServerFrame, ProtocolError> {
    serde_json::from_slice(data).map_err(ProtocolError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_server_wraps_message_with_seq() {
        let bytes = encode_server(
            3,
            ServerMessage::Pong {
                client_time: 10,
                server_time: 20,
            },
        )
        .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["seq"], 3);
        assert_eq!(json["message"]["type"], "Pong");
    }

    #[test]
    fn test_decode_client_garbage_returns_decode_error() {
        let result = decode_client(b"not json at all");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_client_frame_survives_encode_decode() {
        let msg = ClientMessage::Ping { client_time: 99 };
        let bytes = encode_client(&msg).unwrap();
        assert_eq!(decode_client(&bytes).unwrap(), msg);
    }
}
