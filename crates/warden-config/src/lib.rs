//! Warden Configuration System
//!
//! Provides configuration management for the Warden sandbox:
//! - Project configuration (warden.toml)
//! - Global user configuration (~/.warden/config.toml)
//! - Environment variable overrides (WARDEN_*)
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded and merged in the following order (later overrides earlier):
//! 1. Global config (~/.warden/config.toml)
//! 2. Project config (./warden.toml, found by walking up from a directory)
//! 3. Environment variables (WARDEN_*)
//! 4. CLI flags
//!
//! # Example
//!
//! ```no_run
//! use warden_config::ConfigLoader;
//! use std::path::Path;
//!
//! let mut loader = ConfigLoader::new();
//! let loaded = loader.load_from_directory(Path::new(".")).unwrap();
//! println!("timeout: {:?}", loaded.config.sandbox().timeout());
//! ```

pub mod loader;
pub mod settings;

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Unknown permission tier '{0}'")]
    UnknownTier(String),

    #[error("Invalid blocked pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Home directory not found")]
    HomeNotFound,
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

pub use loader::{ConfigLoader, LoadedConfig};
pub use settings::{
    CacheSettings, SandboxSettings, TierSettings, ValidatorSettings, WardenConfig, KNOWN_TIERS,
};
