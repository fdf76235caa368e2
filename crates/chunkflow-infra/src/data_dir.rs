//! Data directory resolution.
//!
//! The data directory holds `config.toml` and the session database.

use std::path::PathBuf;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "CHUNKFLOW_DATA_DIR";

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `CHUNKFLOW_DATA_DIR` environment variable
/// 2. `~/.chunkflow` under the user's home directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".chunkflow");
    }

    // Last resort: current directory
    PathBuf::from(".chunkflow")
}
