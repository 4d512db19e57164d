mod config;
pub mod database;
pub mod memory;
pub mod schedule_store;

pub use config::{
    ConsequenceConfig, EngineConfig, HeartbeatConfig, RampConfigSection, RecheckConfig,
};
pub use database::Database;
pub use memory::MemoryStore;
pub use schedule_store::ScheduleStore;

use std::path::PathBuf;

use crate::error::{ConfigError, PersistenceError};

/// Durable key-value persistence.
///
/// A `put` issued before a crash must be either fully durable or fully
/// absent; no partial value may ever be observed by `get`.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;

    fn put(&self, key: &str, value: &str) -> Result<(), PersistenceError>;

    /// Removing a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), PersistenceError>;

    /// All `(key, value)` pairs whose key starts with `prefix`, ordered by key.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, PersistenceError>;
}

/// Returns the Wakeguard data directory.
///
/// `WAKEGUARD_DATA_DIR` wins when set. Otherwise `~/.config/wakeguard/`, or
/// `~/.config/wakeguard-dev/` when `WAKEGUARD_ENV=dev`.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("WAKEGUARD_DATA_DIR") {
        Some(explicit) => PathBuf::from(explicit),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("WAKEGUARD_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("wakeguard-dev")
            } else {
                base_dir.join("wakeguard")
            }
        }
    };

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
