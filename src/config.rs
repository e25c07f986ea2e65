//! Configuration system using TOML files.
//!
//! Config is stored in the OS-standard config directory:
//! - Windows: %APPDATA%\media-reconciler\config.toml
//! - macOS: ~/Library/Application Support/media-reconciler/config.toml
//! - Linux: ~/.config/media-reconciler/config.toml
//!
//! The config file is human-readable and editable. Command-line flags
//! override whatever it contains.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which library to reconcile
    pub library: LibraryConfig,

    /// Identity store location
    pub database: DatabaseConfig,

    /// Batch pipeline tuning
    pub pipeline: PipelineConfig,
}

/// Library settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Directory holding the creator's media
    pub root: Option<PathBuf>,

    /// Creator whose records the pipeline owns
    pub owner_id: Option<i64>,
}

/// Database settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file (defaults to `media_reconciler.db` in the working directory)
    pub path: Option<PathBuf>,
}

/// Pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound on candidates reconciled at once
    pub max_concurrency: usize,

    /// Dedicated hashing threads
    pub hash_threads: usize,

    /// Run the legacy marker migration before the main pass
    pub migrate_legacy: bool,

    /// Run the verification pass after the main pass
    pub verify_after: bool,

    /// Delete candidates that duplicate an existing file
    pub delete_duplicates: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 16,
            hash_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            migrate_legacy: true,
            verify_after: true,
            delete_duplicates: true,
        }
    }
}

impl Config {
    /// The library root, which must be an existing directory.
    pub fn require_root(&self) -> Result<&Path> {
        let root = self
            .library
            .root
            .as_deref()
            .ok_or_else(|| Error::missing("library root directory is not configured"))?;
        if !root.is_dir() {
            return Err(Error::missing(format!(
                "library root {} is not a directory",
                root.display()
            )));
        }
        Ok(root)
    }

    pub fn require_owner(&self) -> Result<i64> {
        self.library
            .owner_id
            .ok_or_else(|| Error::missing("owner id is not configured"))
    }

    /// SQLite URL for the configured database.
    pub fn db_url(&self) -> String {
        crate::db::db_url(self.database.path.as_deref())
    }
}

// ============================================================================
// Config File Operations
// ============================================================================

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("media-reconciler"))
}

/// Get the full path to the config file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Load configuration from disk
///
/// Returns default config if file doesn't exist or can't be parsed.
/// Logs warnings but doesn't fail - we always return a usable config.
pub fn load() -> Config {
    let Some(path) = config_path() else {
        tracing::warn!("Could not determine config directory, using defaults");
        return Config::default();
    };

    if !path.exists() {
        tracing::debug!("No config file found at {:?}, using defaults", path);
        return Config::default();
    }

    match load_from(&path) {
        Ok(config) => {
            tracing::info!("Loaded config from {:?}", path);
            config
        }
        Err(e) => {
            tracing::error!("{}", e);
            tracing::warn!("Using default configuration");
            Config::default()
        }
    }
}

/// Load configuration from an explicit file. Unlike [`load`], any problem
/// is an error.
pub fn load_from(path: &Path) -> std::result::Result<Config, ConfigError> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
    toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
}

/// Save configuration to the default location
///
/// Creates the config directory if it doesn't exist.
pub fn save(config: &Config) -> std::result::Result<PathBuf, ConfigError> {
    let path = config_path().ok_or(ConfigError::NoConfigDir)?;
    save_to(config, &path)?;
    Ok(path)
}

/// Save configuration to `path`, atomically.
pub fn save_to(config: &Config, path: &Path) -> std::result::Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::CreateDir(dir.to_path_buf(), e))?;
    }

    // Serialize to pretty TOML
    let contents = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;

    // Write atomically (write to temp, then rename)
    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, &contents).map_err(|e| ConfigError::Write(temp_path.clone(), e))?;
    std::fs::rename(&temp_path, path)
        .map_err(|e| ConfigError::Rename(temp_path, path.to_path_buf(), e))?;

    tracing::info!("Saved config to {:?}", path);
    Ok(())
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read config file {0}: {1}")]
    Read(PathBuf, std::io::Error),

    #[error("Failed to parse config file {0}: {1}")]
    Parse(PathBuf, toml::de::Error),

    #[error("Failed to create config directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),

    #[error("Failed to write config to {0}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("Failed to rename temp file {0} to {1}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::config(e.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================
