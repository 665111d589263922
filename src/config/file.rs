//! TOML configuration file loading
//!
//! Supports `~/.config/skyris/config.toml` (or `$SKYRIS_CONFIG`) as a
//! persistent config source. All fields are optional; the file is a partial
//! overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::SpeechConfig;
use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct SkyrisConfigFile {
    /// Speech engine tuning; missing keys keep their defaults
    #[serde(default)]
    pub speech: SpeechConfig,

    /// AI backend connection
    #[serde(default)]
    pub backend: BackendFileConfig,

    /// Where to keep a copy of every packaged utterance
    #[serde(default)]
    pub recordings_dir: Option<String>,
}

/// AI backend configuration
#[derive(Debug, Default, Deserialize)]
pub struct BackendFileConfig {
    /// Base URL (e.g. "http://localhost:5001")
    pub url: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: Option<u64>,

    /// Speech synthesis style
    pub audio_style: Option<String>,
}

/// Parse a config file
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn read_config_file(path: &Path) -> Result<SkyrisConfigFile> {
    let content = std::fs::read_to_string(path)?;
    let file = toml::from_str(&content)?;
    Ok(file)
}

/// Load the TOML config file from `path`
///
/// Returns `SkyrisConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file(path: &Path) -> SkyrisConfigFile {
    if !path.exists() {
        return SkyrisConfigFile::default();
    }

    match read_config_file(path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            SkyrisConfigFile::default()
        }
    }
}

/// Return the config file path: `$SKYRIS_CONFIG` or `~/.config/skyris/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("SKYRIS_CONFIG") {
        return Some(PathBuf::from(path));
    }
    directories::ProjectDirs::from("com", "skyrisai", "skyris").map(|d| d.config_dir().join("config.toml"))
}
