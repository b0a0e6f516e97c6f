//! Room store: the registry of live rooms.
//!
//! The map itself is a `DashMap`, guarded separately from any room. Holding
//! a shard lock never waits on a room actor: handles are cloned out before
//! anything is awaited.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use kingside_protocol::RoomId;
use kingside_rules::RulesEngine;
use tokio::time::Instant;

use crate::broadcast::ConnectionSender;
use crate::room::{spawn_room, Joined, RoomHandle};
use crate::session::{JoinRequest, RoomSession};
use crate::{
    ArchiveError, CompletedGame, GameArchive, OpenSeating, RoomConfig, RoomError, RoomInit,
    SeatPolicy,
};

/// Creates rooms on first use, hands out handles, and evicts finished rooms.
pub struct RoomStore<R: RulesEngine> {
    rooms: DashMap<RoomId, RoomHandle>,
    engine: Arc<R>,
    policy: Arc<dyn SeatPolicy>,
    archive: Option<Arc<dyn GameArchive>>,
    config: RoomConfig,
}

impl<R: RulesEngine> RoomStore<R> {
    /// A store with open seating and no archive.
    pub fn new(engine: R, config: RoomConfig) -> Self {
        Self {
            rooms: DashMap::new(),
            engine: Arc::new(engine),
            policy: Arc::new(OpenSeating),
            archive: None,
            config,
        }
    }

    /// Replaces the seat policy for rooms created from now on.
    pub fn with_seat_policy(self, policy: impl SeatPolicy) -> Self {
        self.with_shared_seat_policy(Arc::new(policy))
    }

    /// Like [`with_seat_policy`](Self::with_seat_policy), for a policy that
    /// is already shared.
    pub fn with_shared_seat_policy(mut self, policy: Arc<dyn SeatPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Archives every finished game of rooms created from now on.
    pub fn with_archive(mut self, archive: Arc<dyn GameArchive>) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Returns the room for `room_id`, creating it if it doesn't exist.
    ///
    /// Concurrent first access creates exactly one room. `init` is only
    /// used when this call is the one that creates it. A room whose actor
    /// has stopped is replaced.
    ///
    /// An id that already has an archived game is never reused for a new
    /// one: the room comes back as that finished game, open to spectators
    /// only.
    ///
    /// # Errors
    /// - [`RoomError::InvalidRoomId`] if `room_id` is malformed
    /// - [`RoomError::Archive`] if the archived record cannot be read or
    ///   replayed
    pub async fn get_or_create(&self, room_id: &str, init: RoomInit) -> Result<RoomHandle, RoomError> {
        let room_id = parse_room_id(room_id)?;
        if let Some(handle) = self.get(&room_id).filter(|h| !h.is_closed()) {
            return Ok(handle);
        }

        let archived = self.archived(&room_id).await?;
        let handle = match self.rooms.entry(room_id.clone()) {
            Entry::Occupied(entry) if !entry.get().is_closed() => entry.get().clone(),
            Entry::Occupied(mut entry) => {
                let handle = self.spawn(room_id, init, archived)?;
                entry.insert(handle.clone());
                handle
            }
            Entry::Vacant(entry) => {
                let handle = self.spawn(room_id, init, archived)?;
                entry.insert(handle.clone());
                handle
            }
        };
        Ok(handle)
    }

    /// Looks up an existing room.
    pub fn get(&self, room_id: &RoomId) -> Option<RoomHandle> {
        self.rooms.get(room_id).map(|h| h.value().clone())
    }

    /// Joins `room_id`, creating it if needed.
    ///
    /// A room can be evicted between lookup and join; the join is then
    /// retried once against a fresh room.
    pub async fn join(
        &self,
        room_id: &str,
        init: RoomInit,
        request: JoinRequest,
        sender: ConnectionSender,
    ) -> Result<(RoomHandle, Joined), RoomError> {
        let handle = self.get_or_create(room_id, init).await?;
        match handle.join(request.clone(), sender.clone()).await {
            Err(RoomError::Unavailable(_)) => {
                tracing::debug!(room_id, "room went away during join, retrying");
                let handle = self.get_or_create(room_id, init).await?;
                let joined = handle.join(request, sender).await?;
                Ok((handle, joined))
            }
            other => other.map(|joined| (handle, joined)),
        }
    }

    /// Drops a room if nobody is connected and its game is over.
    ///
    /// Eligibility is decided by the room actor itself, after every command
    /// queued ahead of this one. Returns whether the room was removed.
    pub async fn remove(&self, room_id: &RoomId) -> Result<bool, RoomError> {
        let Some(handle) = self.get(room_id) else {
            return Ok(false);
        };
        let evicted = handle.evict(false).await?;
        if evicted {
            self.forget(&handle);
        }
        Ok(evicted)
    }

    /// Visits every room once: aborts abandoned ones (idle past the idle
    /// timeout with nobody connected) and evicts every finished room nobody
    /// is connected to. Returns the ids removed.
    pub async fn sweep(&self) -> Vec<RoomId> {
        let handles: Vec<RoomHandle> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut evicted = Vec::new();
        for handle in handles {
            match handle.evict(true).await {
                Ok(true) | Err(RoomError::Unavailable(_)) => {
                    self.forget(&handle);
                    evicted.push(handle.room_id().clone());
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(room_id = %handle.room_id(), error = %e, "sweep skipped room");
                }
            }
        }
        if !evicted.is_empty() {
            tracing::info!(count = evicted.len(), remaining = self.rooms.len(), "swept rooms");
        }
        evicted
    }

    /// Ids of every room currently in the store.
    pub fn list_active(&self) -> Vec<RoomId> {
        self.rooms.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Stops every room. Used on server shutdown.
    pub async fn shutdown(&self) {
        let handles: Vec<RoomHandle> = self.rooms.iter().map(|e| e.value().clone()).collect();
        for handle in handles {
            let _ = handle.shutdown().await;
        }
        self.rooms.clear();
    }

    /// The archived record for `room_id`, read on the blocking pool.
    async fn archived(&self, room_id: &RoomId) -> Result<Option<CompletedGame>, RoomError> {
        let Some(archive) = self.archive.clone() else {
            return Ok(None);
        };
        let id = room_id.clone();
        let record = tokio::task::spawn_blocking(move || archive.load(&id))
            .await
            .unwrap_or_else(|e| Err(ArchiveError::Task(e.to_string())))?;
        Ok(record)
    }

    fn spawn(
        &self,
        room_id: RoomId,
        init: RoomInit,
        archived: Option<CompletedGame>,
    ) -> Result<RoomHandle, RoomError> {
        let engine = Arc::clone(&self.engine);
        let policy = Arc::clone(&self.policy);
        let now = Instant::now();
        let session = match archived {
            Some(record) => {
                tracing::info!(%room_id, status = ?record.result.status, "reopening archived game");
                RoomSession::restore(record, engine, policy, &self.config, now)?
            }
            None => {
                tracing::info!(%room_id, ?init, "room created");
                RoomSession::new(room_id, engine, policy, &self.config, init, now)
            }
        };
        Ok(spawn_room(session, self.archive.clone(), &self.config))
    }

    /// Removes `handle`'s room from the map, unless it has already been
    /// replaced by a newer room with the same id.
    fn forget(&self, handle: &RoomHandle) {
        let removed = self
            .rooms
            .remove_if(handle.room_id(), |_, current| current.same_room(handle))
            .is_some();
        if removed {
            tracing::info!(room_id = %handle.room_id(), "room evicted");
        }
    }
}

fn parse_room_id(raw: &str) -> Result<RoomId, RoomError> {
    RoomId::parse(raw).map_err(|_| RoomError::InvalidRoomId(raw.chars().take(80).collect()))
}
