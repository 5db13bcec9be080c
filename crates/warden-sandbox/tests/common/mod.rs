//! Shared helpers for sandbox integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use warden_sandbox::{
    ExecutionResult, MemoryEventSink, PermissionProfile, PermissionTier, Sandbox, SandboxOptions,
};

pub fn profile(tier: PermissionTier) -> PermissionProfile {
    PermissionProfile::builder("mods/test")
        .tier(tier)
        .build()
        .unwrap()
}

pub fn profile_with_timeout(tier: PermissionTier, timeout: Duration) -> PermissionProfile {
    PermissionProfile::builder("mods/test")
        .tier(tier)
        .timeout(timeout)
        .build()
        .unwrap()
}

/// Sandbox whose audit records can be inspected
pub fn audited_sandbox() -> (Sandbox, Arc<MemoryEventSink>) {
    let sink = Arc::new(MemoryEventSink::new());
    let sandbox = Sandbox::new(SandboxOptions::default().with_sink(sink.clone()));
    (sandbox, sink)
}

/// Run the script body under `Restricted`
pub fn run(source: &str) -> ExecutionResult {
    Sandbox::default().execute_script(source, "", Vec::new(), &profile(PermissionTier::Restricted))
}
