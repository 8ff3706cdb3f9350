//! Persistent CLI configuration.

use std::env;
use std::path::{Path, PathBuf};

use stash_core::config::SyncSettings;
use stash_core::util::normalize_text_option;

const CONFIG_FILE_NAME: &str = "config.json";
const APP_DIR_NAME: &str = "stash";

pub const API_URL_ENV: &str = "STASH_API_URL";
pub const REALTIME_URL_ENV: &str = "STASH_REALTIME_URL";
pub const DB_PATH_ENV: &str = "STASH_DB_PATH";

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
        .join(CONFIG_FILE_NAME)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
        .join("stash.db")
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os(DB_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

/// Settings stored on disk, without environment overrides.
pub fn load_stored_settings(path: &Path) -> Result<SyncSettings, String> {
    if !path.exists() {
        return Ok(SyncSettings::default());
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|error| format!("Failed to read config at {}: {}", path.display(), error))?;
    SyncSettings::from_json(&raw)
        .map_err(|error| format!("Failed to parse config at {}: {}", path.display(), error))
}

pub fn save_settings(settings: &SyncSettings, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|error| {
            format!(
                "Failed to create config directory {}: {}",
                parent.display(),
                error
            )
        })?;
    }
    let serialized = serde_json::to_string_pretty(settings)
        .map_err(|error| format!("Failed to serialize config: {error}"))?;
    std::fs::write(path, serialized)
        .map_err(|error| format!("Failed to write config at {}: {}", path.display(), error))
}

/// Effective settings: stored file overlaid with `STASH_*` environment variables.
pub fn load_settings() -> Result<SyncSettings, String> {
    let stored = load_stored_settings(&default_config_path())?;
    apply_overrides(
        stored,
        env::var(API_URL_ENV).ok(),
        env::var(REALTIME_URL_ENV).ok(),
    )
}

pub fn apply_overrides(
    mut settings: SyncSettings,
    api_base_url: Option<String>,
    realtime_url: Option<String>,
) -> Result<SyncSettings, String> {
    if let Some(url) = normalize_text_option(api_base_url) {
        settings.api_base_url = Some(url);
    }
    if let Some(url) = normalize_text_option(realtime_url) {
        settings.realtime_url = Some(url);
    }
    settings.normalized()
}
