//! Check command - validate and compile a script without executing it

use anyhow::{Context, Result};
use std::path::Path;
use warden_config::WardenConfig;
use warden_sandbox::{PermissionProfile, Sandbox};
use warden_script::diagnostic::{has_errors, sort_diagnostics};

/// Validate a script against a tier and make sure it compiles
///
/// Warnings alone do not fail the check.
pub fn run(config: &WardenConfig, file: &Path, tier: Option<&str>, json: bool) -> Result<bool> {
    let source = super::read_script(file)?;
    let script_id = super::script_id(file);

    let tier = super::parse_tier(tier)?;
    let profile = PermissionProfile::from_config(script_id.clone(), tier, config)
        .context("Failed to build permission profile")?;
    let sandbox = Sandbox::from_config(config).context("Failed to create sandbox")?;

    let validation = sandbox.validate(&source, &profile);
    let mut diagnostics = validation.diagnostics.clone();
    if validation.ok {
        if let Err(e) = sandbox.compile(&source) {
            diagnostics.extend(
                e.into_diagnostics()
                    .into_iter()
                    .map(|d| d.located_in(&source).with_file(script_id.clone())),
            );
        }
    }
    sort_diagnostics(&mut diagnostics);
    let ok = !has_errors(&diagnostics);

    if json {
        let report = serde_json::json!({
            "file": script_id,
            "tier": profile.tier().as_str(),
            "ok": ok,
            "violations": validation.violations,
            "diagnostics": diagnostics,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        super::print_diagnostics(&diagnostics, &script_id);
        if ok {
            println!("{}: no errors found", script_id);
        }
    }
    Ok(ok)
}
