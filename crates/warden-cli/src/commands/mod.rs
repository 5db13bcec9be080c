pub mod cache;
pub mod check;
pub mod run;

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use warden_sandbox::PermissionTier;
use warden_script::Diagnostic;

/// Read a script from disk
pub(crate) fn read_script(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .with_context(|| format!("Failed to read source file: {}", path.display()))
}

/// Script id used in results and the audit log
pub(crate) fn script_id(path: &Path) -> String {
    path.display().to_string()
}

pub(crate) fn parse_tier(tier: Option<&str>) -> Result<Option<PermissionTier>> {
    tier.map(|t| t.parse::<PermissionTier>())
        .transpose()
        .context("Invalid --tier")
}

/// Print diagnostics to stderr in `file:line:col: level: message` form
pub(crate) fn print_diagnostics(diagnostics: &[Diagnostic], file: &str) {
    for diag in diagnostics {
        eprintln!(
            "{}:{}:{}: {}: [{}] {}",
            file, diag.line, diag.column, diag.level, diag.code, diag.message
        );
    }
}
