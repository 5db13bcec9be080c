//! Configuration Loader
//!
//! Handles loading and merging configuration from multiple sources with proper precedence.

use crate::settings::{WardenConfig, KNOWN_TIERS};
use crate::{ConfigError, ConfigResult};
use std::env;
use std::path::{Path, PathBuf};

/// Project configuration file name
pub const CONFIG_FILE_NAME: &str = "warden.toml";

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. Global config (~/.warden/config.toml) - lowest priority
/// 2. Project config (warden.toml) - overrides global
/// 3. Environment variables (WARDEN_*) - overrides project
/// 4. CLI flags - highest priority (handled by caller)
pub struct ConfigLoader {
    /// Cached global config path
    global_config_path: Option<PathBuf>,
}

/// Merged configuration result
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Effective configuration after merging every source
    pub config: WardenConfig,

    /// Directory where warden.toml was found
    pub project_root: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            global_config_path: None,
        }
    }

    /// Use `path` instead of ~/.warden/config.toml
    pub fn with_global_path(path: impl Into<PathBuf>) -> Self {
        Self {
            global_config_path: Some(path.into()),
        }
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find warden.toml, merges it over the
    /// global config, then applies environment overrides.
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<LoadedConfig> {
        let (project_root, project) = self.find_project_config(start_dir)?;
        self.finish(project, project_root)
    }

    /// Load configuration from a specific project config file
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<LoadedConfig> {
        let project = WardenConfig::load_from_file(config_path)?;
        let project_root = config_path.parent().map(|p| p.to_path_buf());
        self.finish(project, project_root)
    }

    fn finish(
        &mut self,
        project: WardenConfig,
        project_root: Option<PathBuf>,
    ) -> ConfigResult<LoadedConfig> {
        let global = self.load_global_config()?;
        let mut config = global.merge(project);
        apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(LoadedConfig {
            config,
            project_root,
        })
    }

    /// Find project configuration by walking up directory tree
    fn find_project_config(
        &self,
        start_dir: &Path,
    ) -> ConfigResult<(Option<PathBuf>, WardenConfig)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(CONFIG_FILE_NAME);

            if config_path.exists() {
                let config = WardenConfig::load_from_file(&config_path)?;
                return Ok((Some(current), config));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok((None, WardenConfig::default())),
            }
        }
    }

    /// Load global configuration; a missing file or home directory means defaults
    fn load_global_config(&mut self) -> ConfigResult<WardenConfig> {
        if self.global_config_path.is_none() {
            match Self::global_config_dir() {
                Ok(dir) => self.global_config_path = Some(dir.join("config.toml")),
                Err(ConfigError::HomeNotFound) => return Ok(WardenConfig::default()),
                Err(e) => return Err(e),
            }
        }

        match &self.global_config_path {
            Some(path) if path.exists() => WardenConfig::load_from_file(path),
            _ => Ok(WardenConfig::default()),
        }
    }

    /// Get the global configuration directory (~/.warden)
    pub fn global_config_dir() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".warden"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadedConfig {
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Check if a warden.toml was found
    pub fn is_project(&self) -> bool {
        self.project_root.is_some()
    }
}

/// Apply WARDEN_* environment variable overrides
fn apply_env_overrides(config: &mut WardenConfig) -> ConfigResult<()> {
    if let Some(value) = env_u64("WARDEN_TIMEOUT_MS")? {
        config.sandbox.timeout_ms = Some(value);
    }
    if let Some(value) = env_u64("WARDEN_MAX_MEMORY_BYTES")? {
        config.sandbox.max_memory_bytes = Some(value);
    }
    if let Some(value) = env_u64("WARDEN_MAX_STACK_BYTES")? {
        config.sandbox.max_stack_bytes = Some(value);
    }
    if let Ok(tier) = env::var("WARDEN_TIER") {
        let tier = tier.trim().to_lowercase();
        if !KNOWN_TIERS.contains(&tier.as_str()) {
            return Err(ConfigError::UnknownTier(tier));
        }
        config.sandbox.default_tier = Some(tier);
    }
    if let Some(value) = env_u64("WARDEN_CACHE_CAPACITY")? {
        let capacity = usize::try_from(value).map_err(|_| ConfigError::InvalidValue {
            field: "WARDEN_CACHE_CAPACITY".to_string(),
            reason: "value too large".to_string(),
        })?;
        config.cache.capacity = Some(capacity);
    }
    Ok(())
}

fn env_u64(name: &str) -> ConfigResult<Option<u64>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                field: name.to_string(),
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_config_file(dir: &Path, content: &str) -> PathBuf {
        let config_path = dir.join(CONFIG_FILE_NAME);
        fs::write(&config_path, content).unwrap();
        config_path
    }

    /// Loader whose global config lives in `dir` (and usually does not exist)
    fn isolated_loader(dir: &Path) -> ConfigLoader {
        ConfigLoader::with_global_path(dir.join("global.toml"))
    }

    #[test]
    #[serial]
    fn test_load_project_config() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(temp_dir.path(), "[sandbox]\ntimeout_ms = 750\n");

        let loaded = isolated_loader(temp_dir.path())
            .load_from_directory(temp_dir.path())
            .unwrap();

        assert_eq!(loaded.config.sandbox().timeout(), Duration::from_millis(750));
        assert!(loaded.is_project());
    }

    #[test]
    #[serial]
    fn test_find_config_in_parent() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(temp_dir.path(), "[cache]\ncapacity = 3\n");
        let sub_dir = temp_dir.path().join("mods").join("quest");
        fs::create_dir_all(&sub_dir).unwrap();

        let loaded = isolated_loader(temp_dir.path())
            .load_from_directory(&sub_dir)
            .unwrap();

        assert_eq!(loaded.config.cache().capacity(), 3);
        assert_eq!(loaded.project_root(), Some(temp_dir.path()));
    }

    #[test]
    #[serial]
    fn test_no_project_config() {
        let temp_dir = TempDir::new().unwrap();
        let loaded = isolated_loader(temp_dir.path())
            .load_from_directory(temp_dir.path())
            .unwrap();
        assert!(!loaded.is_project());
    }

    #[test]
    #[serial]
    fn test_global_config_is_overridden_by_project() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("global.toml"),
            "[sandbox]\ntimeout_ms = 9000\nmax_stack_bytes = 131072\n",
        )
        .unwrap();
        create_config_file(temp_dir.path(), "[sandbox]\ntimeout_ms = 100\n");

        let loaded = isolated_loader(temp_dir.path())
            .load_from_directory(temp_dir.path())
            .unwrap();

        assert_eq!(loaded.config.sandbox().timeout(), Duration::from_millis(100));
        assert_eq!(loaded.config.sandbox().max_stack_bytes(), 131072);
    }

    #[test]
    #[serial]
    fn test_env_overrides_project() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(temp_dir.path(), "[sandbox]\ntimeout_ms = 100\n");

        env::set_var("WARDEN_TIMEOUT_MS", "42");
        env::set_var("WARDEN_TIER", "Elevated");
        let loaded = isolated_loader(temp_dir.path()).load_from_directory(temp_dir.path());
        env::remove_var("WARDEN_TIMEOUT_MS");
        env::remove_var("WARDEN_TIER");

        let loaded = loaded.unwrap();
        assert_eq!(loaded.config.sandbox().timeout(), Duration::from_millis(42));
        assert_eq!(loaded.config.sandbox().tier_name(), "elevated");
    }

    #[test]
    #[serial]
    fn test_invalid_env_value_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        env::set_var("WARDEN_MAX_MEMORY_BYTES", "lots");
        let result = isolated_loader(temp_dir.path()).load_from_directory(temp_dir.path());
        env::remove_var("WARDEN_MAX_MEMORY_BYTES");

        assert!(
            matches!(result, Err(ConfigError::InvalidValue { ref field, .. }) if field == "WARDEN_MAX_MEMORY_BYTES")
        );
    }

    #[test]
    #[serial]
    fn test_load_from_specific_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("custom.toml");
        fs::write(&path, "[sandbox]\ndefault_tier = \"advanced\"\n").unwrap();

        let loaded = isolated_loader(temp_dir.path()).load_from_file(&path).unwrap();
        assert_eq!(loaded.config.sandbox().tier_name(), "advanced");
    }
}
