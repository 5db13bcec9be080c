//! Property tests for validation, containment and caching

mod common;

use common::*;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;
use warden_sandbox::{
    CompileCache, FailureKind, HostApi, PermissionTier, Sandbox, StaticValidator,
};

// ============================================================================
// Generators
// ============================================================================

fn statement() -> impl Strategy<Value = String> {
    prop_oneof![
        (0i64..1000).prop_map(|n| format!("let a{} = {};", n, n)),
        (0i64..50).prop_map(|n| format!("var s = string.from({});", n)),
        Just("let xs = array.new(3, 0);".to_string()),
        Just("import net.http;".to_string()),
        Just("let p = \"../../etc/passwd\";".to_string()),
        Just("unsafe { let z = 1; }".to_string()),
        Just("fn loop_() { return loop_(); }".to_string()),
        Just("let t = fs.read(\"a.txt\");".to_string()),
    ]
}

fn script() -> impl Strategy<Value = String> {
    prop::collection::vec(statement(), 0..8).prop_map(|lines| lines.join("\n"))
}

fn tier() -> impl Strategy<Value = PermissionTier> {
    prop::sample::select(PermissionTier::ALL.to_vec())
}

/// Namespaces no tier below `Advanced` grants
fn ungranted_namespace() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["fs", "net", "net.socket", "storage", "events", "time"])
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn validation_is_deterministic(source in script(), tier in tier()) {
        let validator = StaticValidator::default();
        let profile = profile(tier);
        let first = validator.validate(&source, &profile);
        let second = validator.validate(&source, &profile);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn ungranted_namespace_never_reaches_executor(ns in ungranted_namespace()) {
        let sandbox = Sandbox::default();
        let source = format!("return {}.call(1);", ns);
        let result = sandbox.execute_script(&source, "", Vec::new(), &profile(PermissionTier::Restricted));
        prop_assert_eq!(result.failure_kind, Some(FailureKind::StaticRejection));
        prop_assert_eq!(sandbox.executor_stats().started, 0);
    }

    #[test]
    fn cache_compiles_each_source_once(n in 0i64..10_000, repeats in 1usize..6) {
        let cache = CompileCache::new(8);
        let host = HostApi::with_stdlib();
        let source = format!("return {} + 1;", n);
        let first = cache.get_or_compile(&source, &host).unwrap();
        for _ in 1..repeats {
            let again = cache.get_or_compile(&source, &host).unwrap();
            prop_assert!(Arc::ptr_eq(&first, &again));
        }
        let stats = cache.stats();
        prop_assert_eq!(stats.compiles, 1);
        prop_assert_eq!(stats.hits, repeats as u64 - 1);
    }
}

#[test]
fn test_unrestricted_is_a_superset() {
    let validator = StaticValidator::default();
    let source = "log.info(\"x\");\nlet t = time.elapsed_ms();";
    assert!(!validator.validate(source, &profile(PermissionTier::Restricted)).ok);
    assert!(validator.validate(source, &profile(PermissionTier::Standard)).ok);
    assert!(validator.validate(source, &profile(PermissionTier::Unrestricted)).ok);
}
