//! Sandbox settings (warden.toml / ~/.warden/config.toml)
//!
//! Both files share one schema. Every field is optional; accessors fall back
//! to the built-in defaults so an empty file is a valid configuration.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Permission tier names, lowest to highest
pub const KNOWN_TIERS: [&str; 6] = [
    "none",
    "restricted",
    "standard",
    "elevated",
    "advanced",
    "unrestricted",
];

pub const DEFAULT_TIER: &str = "restricted";
pub const DEFAULT_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_MAX_MEMORY_BYTES: u64 = 64 * 1024 * 1024;
pub const DEFAULT_MAX_STACK_BYTES: u64 = 256 * 1024;
pub const DEFAULT_CANCEL_GRACE_MS: u64 = 100;
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// Complete configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct WardenConfig {
    /// Execution limits and the default tier
    #[serde(default)]
    pub sandbox: SandboxSettings,

    /// Compiled-unit cache
    #[serde(default)]
    pub cache: CacheSettings,

    /// Static validator
    #[serde(default)]
    pub validator: ValidatorSettings,

    /// Per-tier namespace extensions, keyed by tier name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tiers: BTreeMap<String, TierSettings>,
}

/// `[sandbox]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct SandboxSettings {
    /// Tier used when the caller does not pick one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_tier: Option<String>,

    /// Wall-clock limit per execution, in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_memory_bytes: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_stack_bytes: Option<u64>,

    /// How long a timed-out worker gets to observe cancellation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_grace_ms: Option<u64>,
}

/// `[cache]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct CacheSettings {
    /// Maximum number of compiled units kept in memory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,

    /// Directory used by `persist`/`warm_from`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persist_dir: Option<PathBuf>,
}

/// `[validator]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ValidatorSettings {
    /// Extra regexes matched against every string literal
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_patterns: Vec<String>,

    /// Keep the built-in patterns (default: true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_default_patterns: Option<bool>,
}

/// `[tiers.<tier>]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct TierSettings {
    /// Namespaces granted to this tier and every tier above it
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_namespaces: Vec<String>,
}

impl SandboxSettings {
    pub fn tier_name(&self) -> &str {
        self.default_tier.as_deref().unwrap_or(DEFAULT_TIER)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS))
    }

    pub fn max_memory_bytes(&self) -> u64 {
        self.max_memory_bytes.unwrap_or(DEFAULT_MAX_MEMORY_BYTES)
    }

    pub fn max_stack_bytes(&self) -> u64 {
        self.max_stack_bytes.unwrap_or(DEFAULT_MAX_STACK_BYTES)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms.unwrap_or(DEFAULT_CANCEL_GRACE_MS))
    }

    fn merge(self, overlay: Self) -> Self {
        Self {
            default_tier: overlay.default_tier.or(self.default_tier),
            timeout_ms: overlay.timeout_ms.or(self.timeout_ms),
            max_memory_bytes: overlay.max_memory_bytes.or(self.max_memory_bytes),
            max_stack_bytes: overlay.max_stack_bytes.or(self.max_stack_bytes),
            cancel_grace_ms: overlay.cancel_grace_ms.or(self.cancel_grace_ms),
        }
    }
}

impl CacheSettings {
    pub fn capacity(&self) -> usize {
        self.capacity.unwrap_or(DEFAULT_CACHE_CAPACITY)
    }
}

impl ValidatorSettings {
    pub fn use_default_patterns(&self) -> bool {
        self.use_default_patterns.unwrap_or(true)
    }
}

impl WardenConfig {
    /// Load and validate a configuration file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config = Self::parse(&content, path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML without validating; `origin` is used in error messages
    pub fn parse(content: &str, origin: &Path) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::TomlParseError {
            file: origin.to_path_buf(),
            error: e,
        })
    }

    pub fn sandbox(&self) -> &SandboxSettings {
        &self.sandbox
    }

    pub fn cache(&self) -> &CacheSettings {
        &self.cache
    }

    pub fn validator(&self) -> &ValidatorSettings {
        &self.validator
    }

    /// Namespaces configured for exactly `tier` (not including lower tiers)
    pub fn extra_namespaces(&self, tier: &str) -> &[String] {
        self.tiers
            .get(tier)
            .map(|t| t.extra_namespaces.as_slice())
            .unwrap_or(&[])
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(tier) = &self.sandbox.default_tier {
            validate_tier(tier)?;
        }

        for (field, value) in [
            ("sandbox.timeout_ms", self.sandbox.timeout_ms),
            ("sandbox.max_memory_bytes", self.sandbox.max_memory_bytes),
            ("sandbox.max_stack_bytes", self.sandbox.max_stack_bytes),
        ] {
            if value == Some(0) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        if self.cache.capacity == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "cache.capacity".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        for pattern in &self.validator.blocked_patterns {
            regex::Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
        }

        for (tier, settings) in &self.tiers {
            validate_tier(tier)?;
            for namespace in &settings.extra_namespaces {
                if !is_valid_namespace(namespace) {
                    return Err(ConfigError::InvalidValue {
                        field: format!("tiers.{}.extra_namespaces", tier),
                        reason: format!("'{}' is not a dotted identifier path", namespace),
                    });
                }
            }
        }

        Ok(())
    }

    /// Merge `overlay` on top of `self`; overlay values win, lists are unioned
    pub fn merge(self, overlay: Self) -> Self {
        let mut blocked_patterns = self.validator.blocked_patterns;
        for pattern in overlay.validator.blocked_patterns {
            if !blocked_patterns.contains(&pattern) {
                blocked_patterns.push(pattern);
            }
        }

        let mut tiers = self.tiers;
        for (name, settings) in overlay.tiers {
            let entry = tiers.entry(name).or_default();
            for namespace in settings.extra_namespaces {
                if !entry.extra_namespaces.contains(&namespace) {
                    entry.extra_namespaces.push(namespace);
                }
            }
        }

        Self {
            sandbox: self.sandbox.merge(overlay.sandbox),
            cache: CacheSettings {
                capacity: overlay.cache.capacity.or(self.cache.capacity),
                persist_dir: overlay.cache.persist_dir.or(self.cache.persist_dir),
            },
            validator: ValidatorSettings {
                blocked_patterns,
                use_default_patterns: overlay
                    .validator
                    .use_default_patterns
                    .or(self.validator.use_default_patterns),
            },
            tiers,
        }
    }

    /// Serialize back to TOML
    pub fn to_toml_string(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidValue {
            field: "<config>".to_string(),
            reason: e.to_string(),
        })
    }
}

fn validate_tier(tier: &str) -> ConfigResult<()> {
    if KNOWN_TIERS.contains(&tier) {
        Ok(())
    } else {
        Err(ConfigError::UnknownTier(tier.to_string()))
    }
}

fn is_valid_namespace(namespace: &str) -> bool {
    !namespace.is_empty()
        && namespace.split('.').all(|segment| {
            let mut chars = segment.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}
