//! Persistence of finished games.
//!
//! A room writes exactly one [`CompletedGame`] when it reaches Completed or
//! Aborted. Where it goes is up to the [`GameArchive`] the store was built
//! with. A room id is archived at most once: the store reopens an archived
//! id as a read-only room instead of starting a new game under it.

use std::io::Write;
use std::path::{Path, PathBuf};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use kingside_protocol::{GameResult, Move, Participant, RoomId, TimeControl};
use serde::{Deserialize, Serialize};

use crate::ArchiveError;

/// The persisted record of one finished room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedGame {
    pub room_id: RoomId,
    /// Engine rendering of the final position.
    pub final_position: String,
    pub move_log: Vec<Move>,
    pub result: GameResult,
    /// Everyone in the room when the result was decided, players first.
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub time_control: Option<TimeControl>,
    #[serde(default)]
    pub is_rated: bool,
}

/// Storage for completed games.
///
/// Both methods may block. Rooms call them on Tokio's blocking pool, and a
/// room waits for `store` to finish before it handles its next command.
pub trait GameArchive: Send + Sync + 'static {
    /// Persists `game`.
    ///
    /// # Errors
    /// [`ArchiveError::AlreadyArchived`] if the room already has a record;
    /// the earlier record is left untouched.
    fn store(&self, game: &CompletedGame) -> Result<(), ArchiveError>;

    /// Loads the record for `room_id`, if one was stored.
    fn load(&self, room_id: &RoomId) -> Result<Option<CompletedGame>, ArchiveError>;
}

// ---------------------------------------------------------------------------
// MemoryArchive
// ---------------------------------------------------------------------------

/// Keeps records in memory. Good for tests and for the demo server.
#[derive(Debug, Default)]
pub struct MemoryArchive {
    games: DashMap<RoomId, CompletedGame>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }
}

impl GameArchive for MemoryArchive {
    fn store(&self, game: &CompletedGame) -> Result<(), ArchiveError> {
        match self.games.entry(game.room_id.clone()) {
            Entry::Occupied(_) => Err(ArchiveError::AlreadyArchived(game.room_id.clone())),
            Entry::Vacant(entry) => {
                entry.insert(game.clone());
                Ok(())
            }
        }
    }

    fn load(&self, room_id: &RoomId) -> Result<Option<CompletedGame>, ArchiveError> {
        Ok(self.games.get(room_id).map(|g| g.value().clone()))
    }
}

// ---------------------------------------------------------------------------
// JsonDirArchive
// ---------------------------------------------------------------------------

/// One pretty-printed JSON file per room: `<dir>/<room_id>.json`.
///
/// Room ids are restricted to `[A-Za-z0-9_-]`, so they are always safe file
/// names.
#[derive(Debug, Clone)]
pub struct JsonDirArchive {
    dir: PathBuf,
}

impl JsonDirArchive {
    /// Uses `dir`, creating it if needed.
    ///
    /// # Errors
    /// Fails if the directory cannot be created.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, room_id: &RoomId) -> PathBuf {
        self.dir.join(format!("{room_id}.json"))
    }
}

impl GameArchive for JsonDirArchive {
    fn store(&self, game: &CompletedGame) -> Result<(), ArchiveError> {
        let json = serde_json::to_vec_pretty(game)?;
        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.path_for(&game.room_id))
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(ArchiveError::AlreadyArchived(game.room_id.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(&json)?;
        file.sync_all()?;
        Ok(())
    }

    fn load(&self, room_id: &RoomId) -> Result<Option<CompletedGame>, ArchiveError> {
        let bytes = match std::fs::read(self.path_for(room_id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}
