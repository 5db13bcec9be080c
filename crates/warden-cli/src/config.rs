//! CLI configuration via environment variables
//!
//! Sandbox limits come from `warden.toml` through `ConfigLoader`; this only
//! covers how the CLI itself presents output.

use std::env;

/// CLI configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Default to JSON output (WARDEN_DIAGNOSTICS=json)
    pub default_json: bool,
    /// Log filter directive (WARDEN_LOG, defaults to "warn")
    pub log_filter: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            default_json: env::var("WARDEN_DIAGNOSTICS")
                .map(|v| v.to_lowercase() == "json")
                .unwrap_or(false),
            log_filter: env::var("WARDEN_LOG").unwrap_or_else(|_| "warn".to_string()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
