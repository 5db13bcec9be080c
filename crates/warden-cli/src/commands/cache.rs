//! Cache command - persist and warm the compiled-unit cache

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use warden_config::WardenConfig;
use warden_sandbox::Sandbox;

/// Compile every file into a fresh cache and write it to `dir`
pub fn persist(config: &WardenConfig, dir: &Path, files: &[PathBuf]) -> Result<bool> {
    let sandbox = sandbox_without_persist_dir(config)?;
    let failed = compile_all(&sandbox, files)?;
    let written = sandbox
        .persist_cache(dir)
        .with_context(|| format!("Failed to persist cache to {}", dir.display()))?;
    println!("persisted {} unit(s) to {}", written, dir.display());
    Ok(failed == 0)
}

/// Load what `dir` holds, then compile any files not already present
pub fn warm(config: &WardenConfig, dir: &Path, files: &[PathBuf]) -> Result<bool> {
    let sandbox = sandbox_without_persist_dir(config)?;
    let report = sandbox
        .warm_cache(dir)
        .with_context(|| format!("Failed to warm cache from {}", dir.display()))?;
    let failed = compile_all(&sandbox, files)?;
    let stats = sandbox.cache_stats();
    println!(
        "loaded {} unit(s), discarded {}, compiled {}, {} cached",
        report.loaded, report.discarded, stats.compiles, stats.entries
    );
    Ok(failed == 0)
}

fn sandbox_without_persist_dir(config: &WardenConfig) -> Result<Sandbox> {
    let mut config = config.clone();
    config.cache.persist_dir = None;
    Sandbox::from_config(&config).context("Failed to create sandbox")
}

/// Compile each file, printing diagnostics for failures; returns the failure count
fn compile_all(sandbox: &Sandbox, files: &[PathBuf]) -> Result<usize> {
    let mut failed = 0;
    for file in files {
        let source = super::read_script(file)?;
        if let Err(e) = sandbox.compile(&source) {
            let id = super::script_id(file);
            let diagnostics: Vec<_> = e
                .into_diagnostics()
                .into_iter()
                .map(|d| d.located_in(&source).with_file(id.clone()))
                .collect();
            super::print_diagnostics(&diagnostics, &id);
            failed += 1;
        }
    }
    Ok(failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_persist_then_warm() {
        let scripts = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        let a = scripts.path().join("a.wd");
        let b = scripts.path().join("b.wd");
        fs::write(&a, "return 1;").unwrap();
        fs::write(&b, "return 2;").unwrap();

        let config = WardenConfig::default();
        assert!(persist(&config, cache_dir.path(), &[a.clone(), b]).unwrap());
        assert_eq!(fs::read_dir(cache_dir.path()).unwrap().count(), 2);

        assert!(warm(&config, cache_dir.path(), &[a]).unwrap());
    }

    #[test]
    fn test_persist_reports_compile_failure() {
        let scripts = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        let bad = scripts.path().join("bad.wd");
        fs::write(&bad, "return nope(;").unwrap();

        assert!(!persist(&WardenConfig::default(), cache_dir.path(), &[bad]).unwrap());
    }
}
