//! Per-connection handler: handshake, auth, and message routing.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Receive `Hello` → validate version
//!   2. Authenticate token → get `UserId`
//!   3. Send `Welcome` → spawn the writer task
//!   4. Loop: receive client messages → route to rooms
//!
//! Replies and room broadcasts share one ordered channel per connection.
//! The writer task drains it, stamps sequence numbers, and does the network
//! I/O, so a room never waits on a slow socket.

use std::sync::Arc;

use kingside_protocol::{
    decode_client, encode_server, ClientMessage, ConnectionId, ErrorCode, ProtocolError,
    RoomId, ServerMessage, UserId, PROTOCOL_VERSION,
};
use kingside_room::{ConnectionSender, JoinRequest, RoomError, RoomHandle, RoomInit};
use kingside_rules::RulesEngine;
use kingside_transport::{
    Connection, FrameSink, FrameStream, WebSocketConnection, WebSocketSink, WebSocketStream,
};
use tokio::sync::mpsc;

use crate::server::ServerState;
use crate::{Authenticator, KingsideError};

/// Drop guard that leaves every joined room when the handler exits.
///
/// Runs even if the handler panics. `Drop` is synchronous, so the async
/// cleanup goes into a fire-and-forget task.
struct ConnectionGuard<R: RulesEngine, A: Authenticator> {
    conn_id: ConnectionId,
    state: Arc<ServerState<R, A>>,
}

impl<R: RulesEngine, A: Authenticator> Drop for ConnectionGuard<R, A> {
    fn drop(&mut self) {
        let conn_id = self.conn_id;
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            leave_all(&state, conn_id).await;
        });
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<R, A>(
    conn: WebSocketConnection,
    state: Arc<ServerState<R, A>>,
) -> Result<(), KingsideError>
where
    R: RulesEngine,
    A: Authenticator,
{
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");
    let (mut sink, mut stream) = conn.split();

    // --- Step 1: Handshake ---
    let user = match perform_handshake(&mut sink, &mut stream, &state).await {
        Ok(user) => user,
        Err(e) => {
            let _ = sink.close().await;
            return Err(e);
        }
    };
    tracing::info!(%conn_id, %user, "user authenticated");

    // --- Step 2: Writer task ---
    // It ends once every sender is gone: ours below, plus one per room
    // subscription, released when the guard leaves the rooms.
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(write_frames(conn_id, sink, rx));

    state.registry.register(conn_id, user.clone());
    let _guard = ConnectionGuard {
        conn_id,
        state: Arc::clone(&state),
    };

    // --- Step 3: Message loop ---
    loop {
        let data = match tokio::time::timeout(state.config.read_timeout(), stream.recv()).await {
            Ok(Ok(Some(data))) => data,
            Ok(Ok(None)) => {
                tracing::info!(%conn_id, %user, "connection closed cleanly");
                break;
            }
            Ok(Err(e)) => {
                tracing::debug!(%conn_id, %user, error = %e, "recv error");
                break;
            }
            Err(_) => {
                tracing::info!(%conn_id, %user, "connection timed out");
                break;
            }
        };

        let msg = match decode_client(&data) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(%conn_id, %user, error = %e, "failed to decode message");
                reply(&tx, ServerMessage::error(ErrorCode::BadRequest, e.to_string(), None));
                continue;
            }
        };

        dispatch(&state, conn_id, &user, &tx, msg).await;
    }

    // _guard drops here → rooms are left.
    Ok(())
}

/// Performs the handshake: receive `Hello`, validate, authenticate, send
/// `Welcome`. Frames sent here carry sequence number 0.
async fn perform_handshake<R, A>(
    sink: &mut WebSocketSink,
    stream: &mut WebSocketStream,
    state: &ServerState<R, A>,
) -> Result<UserId, KingsideError>
where
    R: RulesEngine,
    A: Authenticator,
{
    let data = match tokio::time::timeout(state.config.handshake_timeout(), stream.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(ProtocolError::InvalidMessage(
                "connection closed before handshake".into(),
            )
            .into());
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            return Err(ProtocolError::InvalidMessage("handshake timed out".into()).into());
        }
    };

    let Ok(ClientMessage::Hello { version, token }) = decode_client(&data) else {
        send_direct(
            sink,
            ServerMessage::error(ErrorCode::BadRequest, "expected Hello", None),
        )
        .await?;
        return Err(ProtocolError::InvalidMessage("first message must be Hello".into()).into());
    };

    if version != PROTOCOL_VERSION {
        send_direct(
            sink,
            ServerMessage::error(
                ErrorCode::VersionMismatch,
                format!("version mismatch: expected {PROTOCOL_VERSION}, got {version}"),
                None,
            ),
        )
        .await?;
        return Err(ProtocolError::InvalidMessage("protocol version mismatch".into()).into());
    }

    let user = match state.auth.authenticate(token.as_deref()).await {
        Ok(user) => user,
        Err(e) => {
            send_direct(
                sink,
                ServerMessage::error(ErrorCode::Unauthorized, e.to_string(), None),
            )
            .await?;
            return Err(e.into());
        }
    };

    send_direct(
        sink,
        ServerMessage::Welcome {
            user_id: user.clone(),
            protocol_version: PROTOCOL_VERSION,
        },
    )
    .await?;
    Ok(user)
}

/// Routes one client message. Every outcome, success or failure, is
/// answered on this connection only.
async fn dispatch<R, A>(
    state: &ServerState<R, A>,
    conn_id: ConnectionId,
    user: &UserId,
    tx: &ConnectionSender,
    msg: ClientMessage,
) where
    R: RulesEngine,
    A: Authenticator,
{
    match msg {
        ClientMessage::Hello { .. } => {
            reply(
                tx,
                ServerMessage::error(ErrorCode::BadRequest, "already greeted", None),
            );
        }

        ClientMessage::JoinRoom {
            room_id,
            role,
            color,
            display_name,
            time_control,
            rated,
        } => {
            let init = RoomInit {
                time_control,
                rated,
            };
            let request = JoinRequest {
                conn: conn_id,
                user: user.clone(),
                display_name,
                role,
                color,
            };
            match state.store.join(&room_id, init, request, tx.clone()).await {
                Ok((handle, joined)) => {
                    let room_id = handle.room_id().clone();
                    tracing::info!(
                        %conn_id,
                        %user,
                        %room_id,
                        role = ?joined.participant.role,
                        color = ?joined.participant.color,
                        "joined room"
                    );
                    state.registry.enter(conn_id, handle);
                    reply(
                        tx,
                        ServerMessage::Joined {
                            room_id,
                            participant: joined.participant,
                            membership: joined.membership,
                            snapshot: joined.snapshot,
                        },
                    );
                }
                Err(e) => {
                    // The queued join may still land after the timeout, so
                    // the room is tracked for the disconnect cleanup.
                    if let RoomError::RoomBusy(busy) = &e {
                        if let Some(handle) = state.store.get(busy) {
                            state.registry.enter(conn_id, handle);
                        }
                    }
                    reply_error(tx, &e, RoomId::parse(&room_id).ok());
                }
            }
        }

        ClientMessage::SubmitMove { room_id, mv } => {
            let handle = match joined_room(state, conn_id, user, &room_id) {
                Ok(handle) => handle,
                Err(e) => return reply_error(tx, &e, RoomId::parse(&room_id).ok()),
            };
            let outcome = handle.submit_move(user, mv).await.map(drop);
            reply_move_result(tx, handle.room_id(), user, outcome);
        }

        ClientMessage::Resign { room_id } => {
            let handle = match joined_room(state, conn_id, user, &room_id) {
                Ok(handle) => handle,
                Err(e) => return reply_error(tx, &e, RoomId::parse(&room_id).ok()),
            };
            let outcome = handle.resign(user).await.map(drop);
            reply_move_result(tx, handle.room_id(), user, outcome);
        }

        ClientMessage::LeaveRoom { room_id } => {
            let handle = match joined_room(state, conn_id, user, &room_id) {
                Ok(handle) => handle,
                Err(e) => return reply_error(tx, &e, RoomId::parse(&room_id).ok()),
            };
            let room_id = handle.room_id().clone();
            match handle.leave(conn_id, user).await {
                Ok(()) | Err(RoomError::NotInRoom(..)) => {
                    state.registry.exit(conn_id, &room_id);
                    tracing::info!(%conn_id, %user, %room_id, "left room");
                    reply(tx, ServerMessage::Left { room_id });
                }
                Err(e) => reply_error(tx, &e, Some(room_id)),
            }
        }

        ClientMessage::Ping { client_time } => {
            reply(
                tx,
                ServerMessage::Pong {
                    client_time,
                    server_time: chrono::Utc::now().timestamp_millis().max(0) as u64,
                },
            );
        }
    }
}

/// The room `conn_id` joined under the raw id `raw`.
fn joined_room<R, A>(
    state: &ServerState<R, A>,
    conn_id: ConnectionId,
    user: &UserId,
    raw: &str,
) -> Result<RoomHandle, RoomError>
where
    R: RulesEngine,
    A: Authenticator,
{
    let room_id = RoomId::parse(raw)
        .map_err(|_| RoomError::InvalidRoomId(raw.chars().take(80).collect()))?;
    state
        .registry
        .room(conn_id, &room_id)
        .ok_or_else(|| RoomError::NotInRoom(user.clone(), room_id))
}

/// Leaves every room a closed connection had joined.
///
/// The leaves are queued without the busy timeout, so a busy room still
/// gets them.
pub(crate) async fn leave_all<R, A>(state: &ServerState<R, A>, conn_id: ConnectionId)
where
    R: RulesEngine,
    A: Authenticator,
{
    let Some(departed) = state.registry.unregister(conn_id) else {
        return;
    };
    for handle in &departed.rooms {
        if let Err(e) = handle.disconnect(conn_id, &departed.user).await {
            tracing::debug!(
                %conn_id,
                user = %departed.user,
                room_id = %handle.room_id(),
                error = %e,
                "leave on disconnect failed"
            );
        }
    }
    tracing::info!(
        %conn_id,
        user = %departed.user,
        rooms = departed.rooms.len(),
        "connection cleaned up"
    );
}

/// Drains the connection's outbound channel onto the socket.
async fn write_frames(
    conn_id: ConnectionId,
    mut sink: WebSocketSink,
    mut rx: mpsc::UnboundedReceiver<ServerMessage>,
) {
    let mut seq: u64 = 1;
    while let Some(message) = rx.recv().await {
        let bytes = match encode_server(seq, message) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(%conn_id, error = %e, "failed to encode frame");
                continue;
            }
        };
        seq += 1;
        if let Err(e) = sink.send(bytes).await {
            tracing::debug!(%conn_id, error = %e, "send failed, stopping writer");
            return;
        }
    }
    let _ = sink.close().await;
}

fn reply(tx: &ConnectionSender, message: ServerMessage) {
    // Fails only once the writer has stopped, i.e. the socket is dead.
    let _ = tx.send(message);
}

fn reply_error(tx: &ConnectionSender, err: &RoomError, room_id: Option<RoomId>) {
    reply(tx, ServerMessage::error(err.code(), err.to_string(), room_id));
}

fn reply_move_result(
    tx: &ConnectionSender,
    room_id: &RoomId,
    user: &UserId,
    outcome: Result<(), RoomError>,
) {
    let reason = match outcome {
        Ok(()) => None,
        Err(e) => {
            tracing::debug!(%room_id, %user, error = %e, "request rejected");
            Some(e.code())
        }
    };
    reply(
        tx,
        ServerMessage::MoveResult {
            room_id: room_id.clone(),
            accepted: reason.is_none(),
            reason,
        },
    );
}

async fn send_direct(sink: &mut WebSocketSink, message: ServerMessage) -> Result<(), KingsideError> {
    let bytes = encode_server(0, message)?;
    sink.send(bytes).await?;
    Ok(())
}
