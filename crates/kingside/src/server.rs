//! `KingsideServer` builder and server loop.
//!
//! This is the entry point for running a Kingside server. It ties together
//! all the layers: transport → protocol → registry → rooms.

use std::future::Future;
use std::sync::Arc;

use kingside_room::{GameArchive, JsonDirArchive, RoomStore, SeatPolicy};
use kingside_rules::RulesEngine;
use kingside_transport::{Transport, WebSocketTransport};
use tokio::task::JoinHandle;

use crate::handler::handle_connection;
use crate::{Authenticator, ConnectionRegistry, KingsideError, ServerConfig};

/// Shared server state passed to each connection handler task.
///
/// Nothing in here is behind a server-wide lock: the room store and the
/// registry are concurrent maps, and each room serializes its own work.
pub(crate) struct ServerState<R: RulesEngine, A: Authenticator> {
    pub(crate) store: RoomStore<R>,
    pub(crate) registry: ConnectionRegistry,
    pub(crate) auth: A,
    pub(crate) config: ServerConfig,
}

/// Builder for configuring and starting a Kingside server.
///
/// # Example
///
/// ```rust,no_run
/// use kingside::prelude::*;
///
/// # async fn run() -> Result<(), KingsideError> {
/// let server = KingsideServerBuilder::new()
///     .bind("0.0.0.0:8080")
///     .build(StandardChess, DevAuthenticator)
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct KingsideServerBuilder {
    config: ServerConfig,
    seat_policy: Option<Arc<dyn SeatPolicy>>,
    archive: Option<Arc<dyn GameArchive>>,
}

impl KingsideServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::from_config(ServerConfig::default())
    }

    /// Starts from a loaded configuration.
    pub fn from_config(config: ServerConfig) -> Self {
        Self {
            config,
            seat_policy: None,
            archive: None,
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind = addr.to_string();
        self
    }

    /// Replaces the whole configuration, bind address included.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Decides who may take a free seat. Defaults to open seating.
    pub fn seat_policy(mut self, policy: impl SeatPolicy) -> Self {
        let policy: Arc<dyn SeatPolicy> = Arc::new(policy);
        self.seat_policy = Some(policy);
        self
    }

    /// Where finished games go. Takes precedence over `archive_dir`.
    pub fn archive(mut self, archive: Arc<dyn GameArchive>) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Binds the listener and assembles the server.
    pub async fn build<R, A>(self, engine: R, auth: A) -> Result<KingsideServer<R, A>, KingsideError>
    where
        R: RulesEngine,
        A: Authenticator,
    {
        let transport = WebSocketTransport::bind(&self.config.bind).await?;

        let mut store = RoomStore::new(engine, self.config.room_config());
        if let Some(policy) = self.seat_policy {
            store = store.with_shared_seat_policy(policy);
        }
        let archive = match (self.archive, &self.config.archive_dir) {
            (Some(archive), _) => Some(archive),
            (None, Some(dir)) => {
                let archive: Arc<dyn GameArchive> = Arc::new(JsonDirArchive::open(dir)?);
                tracing::info!(dir = %dir.display(), "archiving finished games");
                Some(archive)
            }
            (None, None) => None,
        };
        if let Some(archive) = archive {
            store = store.with_archive(archive);
        }

        let state = Arc::new(ServerState {
            store,
            registry: ConnectionRegistry::new(),
            auth,
            config: self.config,
        });

        Ok(KingsideServer { transport, state })
    }
}

impl Default for KingsideServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Kingside server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct KingsideServer<R: RulesEngine, A: Authenticator> {
    transport: WebSocketTransport,
    state: Arc<ServerState<R, A>>,
}

impl<R: RulesEngine, A: Authenticator> KingsideServer<R, A> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// Runs the server until the process is terminated.
    pub async fn run(self) -> Result<(), KingsideError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the server until `shutdown` completes, then stops every room.
    ///
    /// Accepts incoming connections and spawns a handler task for each
    /// one. A failed accept is logged and the loop goes on.
    pub async fn run_until(mut self, shutdown: impl Future<Output = ()>) -> Result<(), KingsideError> {
        if let Ok(addr) = self.local_addr() {
            tracing::info!(%addr, "Kingside server running");
        }
        let sweeper = self.spawn_sweeper();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(conn, state).await {
                                tracing::debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
                () = &mut shutdown => break,
            }
        }

        tracing::info!(rooms = self.state.store.len(), "Kingside server shutting down");
        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        self.state.store.shutdown().await;
        Ok(())
    }

    /// Periodically aborts abandoned rooms and evicts finished ones.
    fn spawn_sweeper(&self) -> Option<JoinHandle<()>> {
        let period = self.state.config.sweep_interval()?;
        let state = Arc::clone(&self.state);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let evicted = state.store.sweep().await;
                tracing::debug!(evicted = evicted.len(), rooms = state.store.len(), "sweep finished");
            }
        }))
    }
}
