//! User settings
//!
//! Stored as `config.json` under the platform config directory
//! (`~/.config/parley/` on Linux). A missing file means defaults.

use std::fs;
use std::path::{Path, PathBuf};

use parley_common::protocol::{
    DEFAULT_MODEL, DEFAULT_SYSTEM_INSTRUCTION, DEFAULT_VOICE, SessionConfig,
};

use crate::network::DEFAULT_ENDPOINT;

// =============================================================================
// Constants
// =============================================================================

/// Directory name under the platform config directory
pub const APP_DIR_NAME: &str = "parley";

/// Settings file name
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Environment variable that overrides the stored API key
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// File permissions for the settings file on Unix (owner read/write only)
#[cfg(unix)]
const CONFIG_FILE_MODE: u32 = 0o600;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine the configuration directory")]
    NoConfigDir,

    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid settings in {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
}

// =============================================================================
// Settings
// =============================================================================

/// Persistent client settings
#[derive(Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Settings {
    /// Agent service API key
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,

    /// WebSocket endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Prebuilt voice name
    #[serde(default = "default_voice")]
    pub voice: String,

    #[serde(default = "default_system_instruction")]
    pub system_instruction: String,

    /// Input device name (empty for system default)
    #[serde(default)]
    pub input_device: String,

    /// Output device name (empty for system default)
    #[serde(default)]
    pub output_device: String,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field(
                "api_key",
                &if self.api_key.is_empty() { "" } else { "[REDACTED]" },
            )
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("system_instruction", &self.system_instruction)
            .field("input_device", &self.input_device)
            .field("output_device", &self.output_device)
            .finish()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: default_endpoint(),
            model: default_model(),
            voice: default_voice(),
            system_instruction: default_system_instruction(),
            input_device: String::new(),
            output_device: String::new(),
        }
    }
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_voice() -> String {
    DEFAULT_VOICE.to_string()
}

fn default_system_instruction() -> String {
    DEFAULT_SYSTEM_INSTRUCTION.to_string()
}

impl Settings {
    /// Get the platform-specific settings file path
    ///
    /// Returns None if the config directory cannot be determined.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load settings from `path`, or from the default location
    ///
    /// A missing file (or no config directory) yields defaults; a file that
    /// exists but cannot be read or parsed is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })
    }

    /// Save settings with restrictive permissions
    ///
    /// Creates the parent directory if it doesn't exist. On Unix the file is
    /// limited to owner read/write since it may hold the API key.
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path().ok_or(ConfigError::NoConfigDir)?,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).map_err(|source| ConfigError::Write {
            path: path.clone(),
            source,
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(CONFIG_FILE_MODE)).map_err(
                |source| ConfigError::Write {
                    path: path.clone(),
                    source,
                },
            )?;
        }

        Ok(path)
    }

    /// Apply environment overrides
    ///
    /// `lookup` is normally `std::env::var(..).ok()`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(API_KEY_ENV).filter(|k| !k.trim().is_empty()) {
            self.api_key = key.trim().to_string();
        }
    }

    /// Whether an API key is configured
    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Setup values sent once per connect
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            model: self.model.clone(),
            voice: self.voice.clone(),
            system_instruction: self.system_instruction.clone(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
