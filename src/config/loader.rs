//! Settings loader for ~/.srt-settings.json.

use std::path::{Path, PathBuf};

use crate::config::schema::Settings;
use crate::error::ConfigError;

/// Default settings file name.
const DEFAULT_SETTINGS_FILE: &str = ".srt-settings.json";

/// Get the default settings file path.
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(DEFAULT_SETTINGS_FILE))
}

/// Load settings from a file path.
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ParseError(format!("Failed to read settings file: {}", e)))?;

    parse_settings(&content)
}

/// Load settings from the default path, or return defaults if not found.
pub fn load_default_settings() -> Result<Settings, ConfigError> {
    match default_settings_path() {
        Some(path) if path.exists() => load_settings(&path),
        _ => Ok(Settings::default()),
    }
}

/// Parse and validate settings from a JSON string.
pub fn parse_settings(json: &str) -> Result<Settings, ConfigError> {
    let settings: Settings = serde_json::from_str(json)
        .map_err(|e| ConfigError::ParseError(format!("Failed to parse settings JSON: {}", e)))?;

    settings.policy.validate()?;

    Ok(settings)
}

/// Parse one line of the control-fd protocol.
/// Returns None if the line is empty, invalid JSON, or fails validation, so the
/// caller keeps its last good policy.
pub fn load_settings_from_string(content: &str) -> Option<Settings> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return None;
    }

    match parse_settings(trimmed) {
        Ok(settings) => Some(settings),
        Err(e) => {
            tracing::debug!("Ignoring settings update: {}", e);
            None
        }
    }
}
