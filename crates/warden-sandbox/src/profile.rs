//! Permission profiles
//!
//! A [`PermissionProfile`] is the only input that decides what a script may
//! touch and how much it may consume. It is built once per script load,
//! never mutated, and shared read-only by every execution of that script.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use warden_config::{SandboxSettings, WardenConfig};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_MEMORY_BYTES: u64 = 64 * 1024 * 1024;
pub const DEFAULT_MAX_STACK_BYTES: u64 = 256 * 1024;
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_millis(100);

/// Profile construction errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProfileError {
    #[error("Script id must not be empty")]
    EmptyScriptId,

    #[error("'{0}' must be greater than zero")]
    ZeroLimit(&'static str),

    #[error("Unknown permission tier '{0}'")]
    UnknownTier(String),

    #[error("Invalid namespace '{0}'")]
    InvalidNamespace(String),
}

/// Trust level of a script, lowest to highest
///
/// Each tier grants every namespace of the tiers below it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PermissionTier {
    None,
    #[default]
    Restricted,
    Standard,
    Elevated,
    Advanced,
    Unrestricted,
}

impl PermissionTier {
    pub const ALL: [PermissionTier; 6] = [
        PermissionTier::None,
        PermissionTier::Restricted,
        PermissionTier::Standard,
        PermissionTier::Elevated,
        PermissionTier::Advanced,
        PermissionTier::Unrestricted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PermissionTier::None => "none",
            PermissionTier::Restricted => "restricted",
            PermissionTier::Standard => "standard",
            PermissionTier::Elevated => "elevated",
            PermissionTier::Advanced => "advanced",
            PermissionTier::Unrestricted => "unrestricted",
        }
    }

    /// Namespaces first granted at this tier
    fn grants(self) -> &'static [&'static str] {
        match self {
            PermissionTier::None | PermissionTier::Unrestricted => &[],
            PermissionTier::Restricted => &["math", "string", "array"],
            PermissionTier::Standard => &["log", "time", "entity"],
            PermissionTier::Elevated => &["storage", "events"],
            PermissionTier::Advanced => &["fs", "net", "reflect", "process"],
        }
    }

    /// Every namespace this tier grants by default, including lower tiers
    pub fn default_namespaces(self) -> Vec<&'static str> {
        Self::ALL
            .into_iter()
            .filter(|tier| *tier <= self)
            .flat_map(|tier| tier.grants().iter().copied())
            .collect()
    }

    /// Raw memory, native libraries, reflection and external processes
    pub fn allows_dangerous_constructs(self) -> bool {
        self >= PermissionTier::Advanced
    }

    /// False only for `Unrestricted`, which skips the allowlist entirely
    pub fn checks_allowlist(self) -> bool {
        self != PermissionTier::Unrestricted
    }
}

impl fmt::Display for PermissionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionTier {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|tier| tier.as_str() == lower)
            .ok_or_else(|| ProfileError::UnknownTier(s.to_string()))
    }
}

/// Outcome of checking one namespace reference against a profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceAccess {
    Allowed,
    /// Matched a deny rule; deny always wins
    Denied { rule: String },
    /// Not covered by the tier defaults or any allow rule
    NotGranted,
}

/// Immutable execution permissions and limits for one script
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionProfile {
    script_id: Arc<str>,
    tier: PermissionTier,
    timeout: Duration,
    max_memory_bytes: u64,
    max_stack_bytes: u64,
    cancel_grace: Duration,
    allowed_namespaces: BTreeSet<String>,
    denied_namespaces: BTreeSet<String>,
}

impl PermissionProfile {
    pub fn builder(script_id: impl Into<String>) -> PermissionProfileBuilder {
        PermissionProfileBuilder::new(script_id)
    }

    /// Profile with limits from `[sandbox]` settings
    pub fn from_settings(
        script_id: impl Into<String>,
        tier: PermissionTier,
        settings: &SandboxSettings,
    ) -> Result<Self, ProfileError> {
        Self::builder(script_id)
            .tier(tier)
            .timeout(settings.timeout())
            .max_memory_bytes(settings.max_memory_bytes())
            .max_stack_bytes(settings.max_stack_bytes())
            .cancel_grace(settings.cancel_grace())
            .build()
    }

    /// Profile from a full configuration
    ///
    /// `tier` overrides `sandbox.default_tier`. Namespaces listed under
    /// `[tiers.<t>]` are granted when the chosen tier is `t` or higher.
    pub fn from_config(
        script_id: impl Into<String>,
        tier: Option<PermissionTier>,
        config: &WardenConfig,
    ) -> Result<Self, ProfileError> {
        let tier = match tier {
            Some(tier) => tier,
            None => config.sandbox().tier_name().parse()?,
        };
        let mut builder = Self::builder(script_id)
            .tier(tier)
            .timeout(config.sandbox().timeout())
            .max_memory_bytes(config.sandbox().max_memory_bytes())
            .max_stack_bytes(config.sandbox().max_stack_bytes())
            .cancel_grace(config.sandbox().cancel_grace());
        for lower in PermissionTier::ALL.into_iter().filter(|t| *t <= tier) {
            for namespace in config.extra_namespaces(lower.as_str()) {
                builder = builder.allow_namespace(namespace.clone());
            }
        }
        builder.build()
    }

    pub fn script_id(&self) -> &str {
        &self.script_id
    }

    pub fn tier(&self) -> PermissionTier {
        self.tier
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_memory_bytes(&self) -> u64 {
        self.max_memory_bytes
    }

    pub fn max_stack_bytes(&self) -> u64 {
        self.max_stack_bytes
    }

    pub fn cancel_grace(&self) -> Duration {
        self.cancel_grace
    }

    /// Explicit allow rules, on top of the tier defaults
    pub fn allowed_namespaces(&self) -> &BTreeSet<String> {
        &self.allowed_namespaces
    }

    pub fn denied_namespaces(&self) -> &BTreeSet<String> {
        &self.denied_namespaces
    }

    /// Tier defaults plus explicit allow rules
    pub fn effective_namespaces(&self) -> BTreeSet<String> {
        self.tier
            .default_namespaces()
            .into_iter()
            .map(str::to_string)
            .chain(self.allowed_namespaces.iter().cloned())
            .collect()
    }

    /// Check a dotted namespace reference such as `net.http`
    pub fn check_namespace(&self, namespace: &str) -> NamespaceAccess {
        if let Some(rule) = self
            .denied_namespaces
            .iter()
            .find(|rule| covers(rule, namespace))
        {
            return NamespaceAccess::Denied { rule: rule.clone() };
        }
        if !self.tier.checks_allowlist() {
            return NamespaceAccess::Allowed;
        }
        let granted = self
            .tier
            .default_namespaces()
            .into_iter()
            .any(|rule| covers(rule, namespace))
            || self
                .allowed_namespaces
                .iter()
                .any(|rule| covers(rule, namespace));
        if granted {
            NamespaceAccess::Allowed
        } else {
            NamespaceAccess::NotGranted
        }
    }
}

/// Builder for [`PermissionProfile`]
#[derive(Debug, Clone)]
pub struct PermissionProfileBuilder {
    script_id: String,
    tier: PermissionTier,
    timeout: Duration,
    max_memory_bytes: u64,
    max_stack_bytes: u64,
    cancel_grace: Duration,
    allowed_namespaces: BTreeSet<String>,
    denied_namespaces: BTreeSet<String>,
}

impl PermissionProfileBuilder {
    fn new(script_id: impl Into<String>) -> Self {
        Self {
            script_id: script_id.into(),
            tier: PermissionTier::default(),
            timeout: DEFAULT_TIMEOUT,
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
            max_stack_bytes: DEFAULT_MAX_STACK_BYTES,
            cancel_grace: DEFAULT_CANCEL_GRACE,
            allowed_namespaces: BTreeSet::new(),
            denied_namespaces: BTreeSet::new(),
        }
    }

    pub fn tier(mut self, tier: PermissionTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_memory_bytes(mut self, bytes: u64) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    pub fn max_stack_bytes(mut self, bytes: u64) -> Self {
        self.max_stack_bytes = bytes;
        self
    }

    pub fn cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    pub fn allow_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.allowed_namespaces.insert(namespace.into());
        self
    }

    pub fn deny_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.denied_namespaces.insert(namespace.into());
        self
    }

    pub fn build(self) -> Result<PermissionProfile, ProfileError> {
        if self.script_id.trim().is_empty() {
            return Err(ProfileError::EmptyScriptId);
        }
        if self.timeout.is_zero() {
            return Err(ProfileError::ZeroLimit("timeout"));
        }
        if self.max_memory_bytes == 0 {
            return Err(ProfileError::ZeroLimit("max_memory_bytes"));
        }
        if self.max_stack_bytes == 0 {
            return Err(ProfileError::ZeroLimit("max_stack_bytes"));
        }
        if let Some(bad) = self
            .allowed_namespaces
            .iter()
            .chain(&self.denied_namespaces)
            .find(|ns| !is_valid_namespace(ns))
        {
            return Err(ProfileError::InvalidNamespace(bad.clone()));
        }

        Ok(PermissionProfile {
            script_id: Arc::from(self.script_id),
            tier: self.tier,
            timeout: self.timeout,
            max_memory_bytes: self.max_memory_bytes,
            max_stack_bytes: self.max_stack_bytes,
            cancel_grace: self.cancel_grace,
            allowed_namespaces: self.allowed_namespaces,
            denied_namespaces: self.denied_namespaces,
        })
    }
}

/// True if `rule` is `namespace` or a dotted prefix of it
pub fn covers(rule: &str, namespace: &str) -> bool {
    namespace == rule
        || (namespace.len() > rule.len()
            && namespace.starts_with(rule)
            && namespace.as_bytes()[rule.len()] == b'.')
}

fn is_valid_namespace(namespace: &str) -> bool {
    !namespace.is_empty()
        && namespace.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn profile(tier: PermissionTier) -> PermissionProfile {
        PermissionProfile::builder("mod.test").tier(tier).build().unwrap()
    }

    #[test]
    fn test_builder_defaults() {
        let p = PermissionProfile::builder("quest").build().unwrap();
        assert_eq!(p.tier(), PermissionTier::Restricted);
        assert_eq!(p.timeout(), Duration::from_secs(2));
        assert_eq!(p.max_memory_bytes(), 64 * 1024 * 1024);
        assert_eq!(p.max_stack_bytes(), 256 * 1024);
        assert_eq!(p.cancel_grace(), Duration::from_millis(100));
    }

    #[rstest]
    #[case::empty_id(PermissionProfile::builder("  "), ProfileError::EmptyScriptId)]
    #[case::zero_timeout(
        PermissionProfile::builder("s").timeout(Duration::ZERO),
        ProfileError::ZeroLimit("timeout")
    )]
    #[case::zero_memory(
        PermissionProfile::builder("s").max_memory_bytes(0),
        ProfileError::ZeroLimit("max_memory_bytes")
    )]
    #[case::zero_stack(
        PermissionProfile::builder("s").max_stack_bytes(0),
        ProfileError::ZeroLimit("max_stack_bytes")
    )]
    #[case::bad_namespace(
        PermissionProfile::builder("s").allow_namespace("net..http"),
        ProfileError::InvalidNamespace("net..http".into())
    )]
    fn test_builder_rejects(#[case] builder: PermissionProfileBuilder, #[case] expected: ProfileError) {
        assert_eq!(builder.build().unwrap_err(), expected);
    }

    #[test]
    fn test_tier_namespaces_are_monotonic() {
        for pair in PermissionTier::ALL.windows(2) {
            let lower: BTreeSet<_> = pair[0].default_namespaces().into_iter().collect();
            let higher: BTreeSet<_> = pair[1].default_namespaces().into_iter().collect();
            assert!(lower.is_subset(&higher), "{} ⊄ {}", pair[0], pair[1]);
        }
    }

    #[rstest]
    #[case::none(PermissionTier::None, "math", NamespaceAccess::NotGranted)]
    #[case::restricted_math(PermissionTier::Restricted, "math", NamespaceAccess::Allowed)]
    #[case::restricted_log(PermissionTier::Restricted, "log", NamespaceAccess::NotGranted)]
    #[case::standard_log(PermissionTier::Standard, "log", NamespaceAccess::Allowed)]
    #[case::restricted_net(PermissionTier::Restricted, "net.http", NamespaceAccess::NotGranted)]
    #[case::advanced_net(PermissionTier::Advanced, "net.http", NamespaceAccess::Allowed)]
    #[case::unrestricted_anything(PermissionTier::Unrestricted, "dragons", NamespaceAccess::Allowed)]
    fn test_tier_access(
        #[case] tier: PermissionTier,
        #[case] namespace: &str,
        #[case] expected: NamespaceAccess,
    ) {
        assert_eq!(profile(tier).check_namespace(namespace), expected);
    }

    #[test]
    fn test_deny_wins_over_tier_and_allow() {
        let p = PermissionProfile::builder("s")
            .tier(PermissionTier::Unrestricted)
            .allow_namespace("net")
            .deny_namespace("net.raw")
            .build()
            .unwrap();
        assert_eq!(p.check_namespace("net.http"), NamespaceAccess::Allowed);
        assert_eq!(
            p.check_namespace("net.raw.socket"),
            NamespaceAccess::Denied {
                rule: "net.raw".into()
            }
        );
    }

    #[test]
    fn test_prefix_matching_respects_segments() {
        assert!(covers("net", "net"));
        assert!(covers("net", "net.http.get"));
        assert!(!covers("net", "network"));
        assert!(!covers("net.http", "net"));
    }

    #[test]
    fn test_explicit_allow_extends_tier() {
        let p = PermissionProfile::builder("s")
            .allow_namespace("inventory")
            .build()
            .unwrap();
        assert_eq!(p.check_namespace("inventory.add"), NamespaceAccess::Allowed);
        assert!(p.effective_namespaces().contains("inventory"));
        assert!(p.effective_namespaces().contains("math"));
    }

    #[test]
    fn test_tier_parsing() {
        assert_eq!("Elevated".parse::<PermissionTier>(), Ok(PermissionTier::Elevated));
        assert_eq!(
            "root".parse::<PermissionTier>(),
            Err(ProfileError::UnknownTier("root".into()))
        );
    }

    #[test]
    fn test_from_config_applies_tier_extras_upward() {
        let config = WardenConfig::parse(
            r#"
[sandbox]
default_tier = "elevated"
timeout_ms = 300

[tiers.standard]
extra_namespaces = ["inventory"]

[tiers.advanced]
extra_namespaces = ["admin"]
"#,
            std::path::Path::new("warden.toml"),
        )
        .unwrap();

        let p = PermissionProfile::from_config("s", None, &config).unwrap();
        assert_eq!(p.tier(), PermissionTier::Elevated);
        assert_eq!(p.timeout(), Duration::from_millis(300));
        assert_eq!(p.check_namespace("inventory"), NamespaceAccess::Allowed);
        assert_eq!(p.check_namespace("admin"), NamespaceAccess::NotGranted);

        let restricted =
            PermissionProfile::from_config("s", Some(PermissionTier::Restricted), &config).unwrap();
        assert_eq!(restricted.check_namespace("inventory"), NamespaceAccess::NotGranted);
    }
}
