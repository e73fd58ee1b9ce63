mod config;
pub mod database;
pub mod migrations;

pub use config::{Config, RemoteConfig, StorageConfig, SyncConfig, MAX_BATCH_SIZE};
pub use database::ReadingStore;

use std::path::PathBuf;

/// Returns `~/.config/flowstate[-dev]/` based on FLOWSTATE_ENV.
///
/// Set FLOWSTATE_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the config directory fails.
pub fn data_dir() -> Result<PathBuf, std::io::Error> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("FLOWSTATE_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("flowstate-dev")
    } else {
        base_dir.join("flowstate")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
