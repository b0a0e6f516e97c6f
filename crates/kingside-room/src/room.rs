//! Room actor: an isolated Tokio task that owns one [`RoomSession`].
//!
//! Each room runs in its own task and talks to the outside world through a
//! bounded mpsc channel. The command loop is the room's serialization
//! point: joins, leaves, moves, timers, and eviction checks all happen here,
//! one at a time, and broadcasts go out right after the mutation they
//! describe.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use kingside_protocol::{
    ConnectionId, MembershipView, MoveRequest, Participant, RoomId, Snapshot, UserId,
};
use kingside_rules::RulesEngine;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::broadcast::{ConnectionSender, Dispatcher};
use crate::session::{JoinRequest, RoomSession};
use crate::{ArchiveError, GameArchive, MoveError, RoomConfig, RoomError};

/// What a successful join hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Joined {
    /// The role actually granted, which may be less than what was asked.
    pub participant: Participant,
    pub membership: MembershipView,
    pub snapshot: Snapshot,
}

/// Commands sent to a room actor through its channel.
///
/// Most carry a `oneshot` reply channel: the caller sends the command and
/// waits for the answer there.
pub(crate) enum RoomCommand {
    Join {
        request: JoinRequest,
        sender: ConnectionSender,
        reply: oneshot::Sender<Joined>,
    },
    Leave {
        conn: ConnectionId,
        user: UserId,
        reply: oneshot::Sender<bool>,
    },
    SubmitMove {
        user: UserId,
        mv: MoveRequest,
        reply: oneshot::Sender<Result<Snapshot, MoveError>>,
    },
    Resign {
        user: UserId,
        reply: oneshot::Sender<Result<Snapshot, MoveError>>,
    },
    Snapshot {
        reply: oneshot::Sender<Snapshot>,
    },
    Membership {
        reply: oneshot::Sender<MembershipView>,
    },
    /// Asks the room whether it may be dropped from the store. With
    /// `abandon_idle`, an idle room nobody is connected to is aborted
    /// first. A room that answers `true` has already stopped.
    Evict {
        abandon_idle: bool,
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

/// Handle to a running room actor.
///
/// Cheap to clone: it is an `mpsc::Sender` plus the room id. Every request
/// is bounded by the store's busy timeout, and a request that runs out of
/// time fails with [`RoomError::RoomBusy`]. The command may still be
/// applied after that; moves are idempotent, so retrying is safe.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    sender: mpsc::Sender<RoomCommand>,
    busy_timeout: Duration,
}

impl RoomHandle {
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Returns `true` once the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Returns `true` if both handles point at the same actor.
    pub fn same_room(&self, other: &RoomHandle) -> bool {
        self.sender.same_channel(&other.sender)
    }

    /// Subscribes a connection and seats it (or lets it watch).
    ///
    /// `sender` receives a `RoomState` snapshot first, then every broadcast
    /// until the connection leaves.
    pub async fn join(
        &self,
        request: JoinRequest,
        sender: ConnectionSender,
    ) -> Result<Joined, RoomError> {
        self.request(|reply| RoomCommand::Join {
            request,
            sender,
            reply,
        })
        .await
    }

    /// Unsubscribes a connection.
    ///
    /// # Errors
    /// [`RoomError::NotInRoom`] if the connection never joined.
    pub async fn leave(&self, conn: ConnectionId, user: &UserId) -> Result<(), RoomError> {
        let user = user.clone();
        let left = self
            .request(|reply| RoomCommand::Leave {
                conn,
                user: user.clone(),
                reply,
            })
            .await?;
        if left {
            Ok(())
        } else {
            Err(RoomError::NotInRoom(user, self.room_id.clone()))
        }
    }

    /// Queues a leave for a connection that has gone away.
    ///
    /// Unlike [`leave`](Self::leave) this is not bounded by the busy
    /// timeout: it waits for room in the queue however long that takes, and
    /// does not wait for the room to answer.
    ///
    /// # Errors
    /// [`RoomError::Unavailable`] if the room has stopped.
    pub async fn disconnect(&self, conn: ConnectionId, user: &UserId) -> Result<(), RoomError> {
        let (reply, _) = oneshot::channel();
        self.sender
            .send(RoomCommand::Leave {
                conn,
                user: user.clone(),
                reply,
            })
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id.clone()))
    }

    /// Submits a move on behalf of `user`.
    pub async fn submit_move(
        &self,
        user: &UserId,
        mv: MoveRequest,
    ) -> Result<Snapshot, RoomError> {
        let user = user.clone();
        let outcome = self
            .request(|reply| RoomCommand::SubmitMove { user, mv, reply })
            .await?;
        Ok(outcome?)
    }

    /// Concedes the game on behalf of `user`.
    pub async fn resign(&self, user: &UserId) -> Result<Snapshot, RoomError> {
        let user = user.clone();
        let outcome = self
            .request(|reply| RoomCommand::Resign { user, reply })
            .await?;
        Ok(outcome?)
    }

    pub async fn snapshot(&self) -> Result<Snapshot, RoomError> {
        self.request(|reply| RoomCommand::Snapshot { reply }).await
    }

    pub async fn membership(&self) -> Result<MembershipView, RoomError> {
        self.request(|reply| RoomCommand::Membership { reply }).await
    }

    pub(crate) async fn evict(&self, abandon_idle: bool) -> Result<bool, RoomError> {
        self.request(|reply| RoomCommand::Evict {
            abandon_idle,
            reply,
        })
        .await
    }

    /// Tells the room to stop without waiting for it.
    pub async fn shutdown(&self) -> Result<(), RoomError> {
        self.sender
            .send(RoomCommand::Shutdown)
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id.clone()))
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> RoomCommand,
    ) -> Result<T, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let exchange = async {
            self.sender
                .send(command(reply_tx))
                .await
                .map_err(|_| RoomError::Unavailable(self.room_id.clone()))?;
            reply_rx
                .await
                .map_err(|_| RoomError::Unavailable(self.room_id.clone()))
        };
        match tokio::time::timeout(self.busy_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(room_id = %self.room_id, "room busy, request timed out");
                Err(RoomError::RoomBusy(self.room_id.clone()))
            }
        }
    }
}

/// The internal room actor state. Runs inside a Tokio task.
struct RoomActor<R: RulesEngine> {
    session: RoomSession<R>,
    dispatcher: Dispatcher,
    archive: Option<Arc<dyn GameArchive>>,
    idle_timeout: Duration,
    receiver: mpsc::Receiver<RoomCommand>,
}

impl<R: RulesEngine> RoomActor<R> {
    /// Runs the actor loop until shutdown, eviction, or every handle is
    /// dropped.
    async fn run(mut self) {
        let room_id = self.session.room_id().clone();
        tracing::info!(%room_id, "room actor started");

        loop {
            let deadline = self.session.next_deadline();
            let flow = tokio::select! {
                cmd = self.receiver.recv() => match cmd {
                    Some(cmd) => self.handle(cmd).await,
                    None => ControlFlow::Break(()),
                },
                () = sleep_until(deadline) => {
                    self.session.on_deadline(Instant::now());
                    ControlFlow::Continue(())
                }
            };
            self.flush().await;
            if flow.is_break() {
                break;
            }
        }

        tracing::info!(%room_id, "room actor stopped");
    }

    async fn handle(&mut self, cmd: RoomCommand) -> ControlFlow<()> {
        let now = Instant::now();
        match cmd {
            RoomCommand::Join {
                request,
                sender,
                reply,
            } => {
                let participant = self.session.join(&request, now);
                let snapshot = self.session.snapshot(now);
                self.dispatcher
                    .subscribe(request.conn, request.user, sender, snapshot.clone());
                let _ = reply.send(Joined {
                    participant,
                    membership: self.session.membership(),
                    snapshot,
                });
            }
            RoomCommand::Leave { conn, user, reply } => {
                let subscribed = self.dispatcher.is_subscribed(conn, &user);
                if subscribed {
                    self.dispatcher.unsubscribe(conn);
                }
                let left = self.session.leave(conn, &user, now);
                let _ = reply.send(subscribed || left);
            }
            RoomCommand::SubmitMove { user, mv, reply } => {
                let outcome = self.session.submit_move(&user, &mv, now);
                if let Err(e) = &outcome {
                    tracing::debug!(
                        room_id = %self.session.room_id(),
                        %user,
                        mv = %mv.uci(),
                        error = %e,
                        "move rejected"
                    );
                }
                let _ = reply.send(outcome);
            }
            RoomCommand::Resign { user, reply } => {
                let _ = reply.send(self.session.resign(&user, now));
            }
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(self.session.snapshot(now));
            }
            RoomCommand::Membership { reply } => {
                let _ = reply.send(self.session.membership());
            }
            RoomCommand::Evict {
                abandon_idle,
                reply,
            } => {
                let evict = self.try_evict(abandon_idle, now);
                // An aborted game is archived before the store may reuse the id.
                self.flush().await;
                let _ = reply.send(evict);
                if evict {
                    return ControlFlow::Break(());
                }
            }
            RoomCommand::Shutdown => {
                tracing::info!(room_id = %self.session.room_id(), "room shutting down");
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// A room may go once nobody is connected and the game is over. An
    /// abandoned game is aborted first when `abandon_idle` is set.
    fn try_evict(&mut self, abandon_idle: bool, now: Instant) -> bool {
        if self.session.connection_count() > 0 || self.dispatcher.len() > 0 {
            return false;
        }
        if abandon_idle
            && !self.session.status().is_terminal()
            && self.session.idle_for(now) >= self.idle_timeout
        {
            tracing::info!(
                room_id = %self.session.room_id(),
                idle_secs = self.session.idle_for(now).as_secs(),
                "room abandoned, aborting"
            );
            self.session.abort(now);
        }
        self.session.status().is_terminal()
    }

    /// Publishes queued events and archives a freshly finished game.
    ///
    /// The archive write runs on the blocking pool. The room waits for it,
    /// so the record exists before the next command is answered.
    async fn flush(&mut self) {
        self.publish_events();
        let Some(record) = self.session.take_completed() else {
            return;
        };
        let Some(archive) = self.archive.clone() else {
            return;
        };
        let room_id = record.room_id.clone();
        let stored = tokio::task::spawn_blocking(move || archive.store(&record))
            .await
            .unwrap_or_else(|e| Err(ArchiveError::Task(e.to_string())));
        match stored {
            Ok(()) => tracing::info!(%room_id, "game archived"),
            Err(e) => tracing::error!(%room_id, error = %e, "failed to archive game"),
        }
    }

    /// Drains the session's outbox into the dispatcher. A connection found
    /// closed on the way is taken out of the room, which queues a
    /// membership change of its own.
    fn publish_events(&mut self) {
        loop {
            let events = self.session.drain_events();
            if events.is_empty() {
                return;
            }
            let now = Instant::now();
            for event in events {
                for (conn, user) in self.dispatcher.publish(event) {
                    if self.session.leave(conn, &user, now) {
                        tracing::info!(
                            room_id = %self.session.room_id(),
                            %conn,
                            %user,
                            "closed connection left the room"
                        );
                    }
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Spawns an actor around `session` and returns a handle to communicate
/// with it.
pub(crate) fn spawn_room<R: RulesEngine>(
    session: RoomSession<R>,
    archive: Option<Arc<dyn GameArchive>>,
    config: &RoomConfig,
) -> RoomHandle {
    let (tx, rx) = mpsc::channel(config.channel_size.max(1));
    let room_id = session.room_id().clone();

    let actor = RoomActor {
        session,
        dispatcher: Dispatcher::new(room_id.clone()),
        archive,
        idle_timeout: config.idle_timeout,
        receiver: rx,
    };

    tokio::spawn(actor.run());

    RoomHandle {
        room_id,
        sender: tx,
        busy_timeout: config.busy_timeout,
    }
}
