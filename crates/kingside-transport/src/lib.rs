//! Transport abstraction layer for Kingside.
//!
//! A connection is used by two tasks at once: the handler reads client
//! frames while a writer task pushes room broadcasts. So instead of one
//! object guarded by a lock, a [`Connection`] is split into an independent
//! [`FrameSink`] and [`FrameStream`] that each task owns outright.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use kingside_protocol::ConnectionId;
#[cfg(feature = "websocket")]
pub use websocket::{
    WebSocketConnection, WebSocketSink, WebSocketStream, WebSocketTransport,
};

use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for generating process-unique connection ids.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates the next [`ConnectionId`]. Ids are never reused.
pub fn next_connection_id() -> ConnectionId {
    ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
}

/// Accepts new incoming connections.
pub trait Transport: Send + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, TransportError>;

    /// The address the transport is listening on.
    fn local_addr(&self) -> std::io::Result<std::net::SocketAddr>;
}

/// A freshly accepted connection, not yet split.
pub trait Connection: Send + 'static {
    /// Write half.
    type Sink: FrameSink;
    /// Read half.
    type Stream: FrameStream;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;

    /// Splits the connection into halves that can live in separate tasks.
    fn split(self) -> (Self::Sink, Self::Stream);
}

/// The write half of a connection.
pub trait FrameSink: Send + 'static {
    /// Sends one frame to the remote peer.
    async fn send(&mut self, data: Vec<u8>) -> Result<(), TransportError>;

    /// Sends a close frame and flushes.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// The read half of a connection.
pub trait FrameStream: Send + 'static {
    /// Receives the next frame from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
}
