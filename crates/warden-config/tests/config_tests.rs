//! Loading warden.toml files the way the CLI does

use pretty_assertions::assert_eq;
use rstest::rstest;
use serial_test::serial;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;
use warden_config::{ConfigError, ConfigLoader, WardenConfig, KNOWN_TIERS};

fn load(content: &str) -> Result<WardenConfig, ConfigError> {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("warden.toml"), content).unwrap();
    ConfigLoader::with_global_path(dir.path().join("absent.toml"))
        .load_from_directory(dir.path())
        .map(|loaded| loaded.config)
}

#[rstest]
#[case::none("none")]
#[case::restricted("restricted")]
#[case::standard("standard")]
#[case::elevated("elevated")]
#[case::advanced("advanced")]
#[case::unrestricted("unrestricted")]
#[serial]
fn test_every_known_tier_is_accepted(#[case] tier: &str) {
    assert!(KNOWN_TIERS.contains(&tier));
    let config = load(&format!("[sandbox]\ndefault_tier = \"{}\"\n", tier)).unwrap();
    assert_eq!(config.sandbox().tier_name(), tier);
}

#[test]
#[serial]
fn test_mod_host_configuration() {
    let config = load(
        r#"
[sandbox]
default_tier = "standard"
timeout_ms = 250
max_memory_bytes = 8388608

[validator]
blocked_patterns = ["^javascript:"]

[tiers.standard]
extra_namespaces = ["inventory"]

[tiers.elevated]
extra_namespaces = ["economy.market"]
"#,
    )
    .unwrap();

    assert_eq!(config.sandbox().timeout(), Duration::from_millis(250));
    assert_eq!(config.sandbox().max_memory_bytes(), 8 * 1024 * 1024);
    assert_eq!(config.validator().blocked_patterns, vec!["^javascript:"]);
    assert_eq!(config.extra_namespaces("elevated"), &["economy.market"]);
}

#[test]
#[serial]
fn test_syntax_error_names_the_file() {
    let err = load("[sandbox\n").unwrap_err();
    match err {
        ConfigError::TomlParseError { file, .. } => {
            assert!(file.ends_with("warden.toml"));
        }
        other => panic!("unexpected {:?}", other),
    }
}
