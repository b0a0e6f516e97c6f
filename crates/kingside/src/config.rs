//! Server configuration, loadable from TOML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use kingside_room::RoomConfig;
use serde::{Deserialize, Serialize};

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Everything the server reads at startup.
///
/// Every field has a default, so a config file only needs the keys it
/// changes:
///
/// ```toml
/// bind = "0.0.0.0:9000"
/// reconnect_grace_secs = 60
/// archive_dir = "/var/lib/kingside/games"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    pub bind: String,
    /// How long a new connection has to send `Hello`.
    pub handshake_timeout_secs: u64,
    /// A connection that sends nothing (not even `Ping`) for this long is
    /// dropped.
    pub read_timeout_secs: u64,
    /// How often the idle sweeper visits every room. `0` disables it.
    pub sweep_interval_secs: u64,
    /// How long a disconnected player's seat stays reserved.
    pub reconnect_grace_secs: u64,
    /// How long a request may wait on a room before failing with
    /// `RoomBusy`.
    pub busy_timeout_ms: u64,
    /// An unfinished room nobody has touched for this long is aborted by
    /// the sweeper.
    pub idle_timeout_secs: u64,
    /// Capacity of each room's command queue.
    pub room_queue_size: usize,
    /// Where finished games are written, one JSON file per room. No
    /// archive when unset.
    pub archive_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let room = RoomConfig::default();
        Self {
            bind: "127.0.0.1:8080".to_string(),
            handshake_timeout_secs: 5,
            read_timeout_secs: 60,
            sweep_interval_secs: 30,
            reconnect_grace_secs: room.reconnect_grace.as_secs(),
            busy_timeout_ms: room.busy_timeout.as_millis() as u64,
            idle_timeout_secs: room.idle_timeout.as_secs(),
            room_queue_size: room.channel_size,
            archive_dir: None,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// The per-room part of the configuration.
    pub fn room_config(&self) -> RoomConfig {
        RoomConfig {
            reconnect_grace: Duration::from_secs(self.reconnect_grace_secs),
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            channel_size: self.room_queue_size,
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// `None` when sweeping is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}
