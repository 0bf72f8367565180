//! Platform-specific paths.

use crate::config::NameServiceConfig;
use crate::{Result, RpcError};
use std::path::PathBuf;

/// Get the per-user minirpc data directory.
///
/// # Platform Behavior
/// - **Linux**: `$XDG_DATA_HOME/minirpc` or `~/.local/share/minirpc`
/// - **macOS**: `~/Library/Application Support/minirpc`
/// - **Windows**: `%APPDATA%\minirpc`
pub fn data_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().ok_or_else(|| RpcError::Io {
        message: "Could not determine platform data directory".to_string(),
        source: None,
    })?;
    Ok(base.join(NameServiceConfig::APP_DIR_NAME))
}

/// Get the path of the SQLite name service database used when a `sqlite:`
/// URI names no file.
///
/// Returns `{data_dir}/nameservice.db`.
pub fn default_name_service_db() -> Result<PathBuf> {
    Ok(data_dir()?.join(NameServiceConfig::DB_FILENAME))
}
