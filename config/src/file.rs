//! The on-disk `~/.push/config.json` layer: whatever `/config` has
//! persisted, one layer below the process environment and one above the
//! built-in defaults.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use push_utils::atomic_write;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("failed to read config at {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to write config at {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },
    #[error("malformed config at {path}: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One provider's persisted overrides; any field left `None` falls through
/// to the environment, then to the built-in default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFileEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// The literal shape of `~/.push/config.json`. Every field is optional so
/// a user can persist only the handful of settings they've touched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_sandbox: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explain_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_search_backend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tavily_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub providers: BTreeMap<String, ProviderFileEntry>,
}

/// `~/.push/config.json`, unless `$PUSH_CONFIG_PATH` overrides it.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".push").join("config.json"))
}

/// A missing file is not an error — it just means nothing has been
/// persisted yet, so every field falls through to its default.
pub fn load_config_file(path: &Path) -> Result<ConfigFile, ConfigFileError> {
    if !path.exists() {
        return Ok(ConfigFile::default());
    }
    let content = fs::read_to_string(path)
        .map_err(|source| ConfigFileError::Read { path: path.to_path_buf(), source })?;
    serde_json::from_str(&content)
        .map_err(|source| ConfigFileError::Parse { path: path.to_path_buf(), source })
}

/// Writes with owner-only (`0600`) permissions via the crate-wide atomic
/// write helper, so a config holding API keys is never world-readable even
/// for the instant between create and chmod.
pub fn save_config_file(path: &Path, config: &ConfigFile) -> Result<(), ConfigFileError> {
    let bytes = serde_json::to_vec_pretty(config)?;
    atomic_write(path, &bytes).map_err(|source| ConfigFileError::Write { path: path.to_path_buf(), source })
}
