//! Configuration file support for the keypoint engine.
//!
//! Settings are stored as versioned JSON so they can be exported, edited by
//! hand and imported again. Native builds keep the file under the user's
//! config directory.

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_MAX_DIRECTIONS, DEFAULT_MAX_HISTORY};
use crate::error::ConfigError;
use crate::sync::MovePolicy;

/// Log level setting for the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Show only errors
    Error,
    /// Show errors and warnings
    Warn,
    /// Show errors, warnings, and info messages
    #[default]
    Info,
    /// Show debug-level logging
    Debug,
    /// Show all log messages including trace
    Trace,
}

impl LogLevel {
    /// Get the display name for this log level.
    pub fn name(&self) -> &'static str {
        match self {
            LogLevel::Error => "Error",
            LogLevel::Warn => "Warn",
            LogLevel::Info => "Info",
            LogLevel::Debug => "Debug",
            LogLevel::Trace => "Trace",
        }
    }

    /// Convert to log crate's LevelFilter.
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }

    /// Set the global `log` max level.
    pub fn apply(&self) {
        log::set_max_level(self.to_level_filter());
        log::debug!("Log level set to {}", self.name());
    }
}

/// Current configuration file format version.
/// Increment this when making breaking changes to the config format.
pub const CONFIG_VERSION: u32 = 1;

/// Engine configuration that can be exported and imported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Version of the configuration file format
    pub version: u32,

    /// Propagation settings
    #[serde(default)]
    pub sync: SyncSettings,

    /// Direction defaults for newly placed keypoints
    #[serde(default)]
    pub directions: DirectionSettings,

    /// Undo history settings
    #[serde(default)]
    pub history: HistorySettings,

    /// Log verbosity level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Propagation section of the config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Propagate edits to later images
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// What a move does on images lacking the record
    #[serde(default)]
    pub move_policy: MovePolicy,

    /// Run the position calibration helper when one is installed
    #[serde(default = "default_true")]
    pub calibrate_positions: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            move_policy: MovePolicy::default(),
            calibrate_positions: true,
        }
    }
}

/// Direction section of the config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionSettings {
    /// `max_directions` given to newly placed keypoints
    #[serde(default = "default_max_directions")]
    pub default_max_directions: u8,
}

fn default_max_directions() -> u8 {
    DEFAULT_MAX_DIRECTIONS
}

impl Default for DirectionSettings {
    fn default() -> Self {
        Self {
            default_max_directions: default_max_directions(),
        }
    }
}

/// Undo section of the config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySettings {
    /// Maximum undo steps kept per image
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

fn default_max_history() -> usize {
    DEFAULT_MAX_HISTORY
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
        }
    }
}

impl EngineConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self {
            version: CONFIG_VERSION,
            sync: SyncSettings::default(),
            directions: DirectionSettings::default(),
            history: HistorySettings::default(),
            log_level: LogLevel::default(),
        }
    }

    /// Serialize the configuration to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;

        // Validate version compatibility
        if config.version > CONFIG_VERSION {
            return Err(ConfigError::VersionTooNew {
                file_version: config.version,
                supported_version: CONFIG_VERSION,
            });
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.directions.default_max_directions == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "directions.default_max_directions",
                message: "must be at least 1".to_string(),
            });
        }
        if self.history.max_history == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "history.max_history",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Get the default filename for config export.
    pub fn default_filename() -> &'static str {
        "kpsync-config.json"
    }

    /// Get the default config file path for auto-load/save.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn default_path() -> Option<std::path::PathBuf> {
        // Try to use XDG config directory, fall back to home directory
        if let Some(config_dir) = dirs::config_dir() {
            Some(config_dir.join("kpsync").join(Self::default_filename()))
        } else {
            dirs::home_dir().map(|home_dir| {
                home_dir
                    .join(".config")
                    .join("kpsync")
                    .join(Self::default_filename())
            })
        }
    }

    /// Load configuration from a file.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json(&json)?;
        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to a file, creating parent directories.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = self.to_json()?;
        std::fs::write(path, json)?;
        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Try to load configuration from the default path.
    /// Returns None if the file doesn't exist or can't be read.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn load_from_default_path() -> Option<Self> {
        let path = Self::default_path()?;
        if !path.exists() {
            log::debug!("No config file found at {:?}", path);
            return None;
        }

        match Self::load_from(&path) {
            Ok(config) => Some(config),
            Err(e) => {
                log::warn!("Failed to load config file {:?}: {}", path, e);
                None
            }
        }
    }

    /// Save configuration to the default path.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn save_to_default_path(&self) -> Result<(), ConfigError> {
        let path = Self::default_path().ok_or_else(|| {
            ConfigError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine config directory",
            ))
        })?;
        self.save_to(&path)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
