//! A runnable Kingside server: standard chess, token-as-identity auth.
//!
//! ```text
//! chess-server [config.toml]
//! RUST_LOG=kingside=debug chess-server
//! ```

use kingside::prelude::*;
use kingside::ConfigError;
use tracing_subscriber::EnvFilter;

/// Reads the config file named on the command line, or falls back to
/// defaults.
fn load_config(path: Option<String>) -> Result<ServerConfig, ConfigError> {
    match path {
        Some(path) => ServerConfig::load(path),
        None => Ok(ServerConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config(std::env::args().nth(1))?;
    tracing::info!(bind = %config.bind, archive = ?config.archive_dir, "starting chess server");

    let server = KingsideServerBuilder::from_config(config)
        .build(StandardChess, DevAuthenticator)
        .await?;

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}
