//! End-to-end tests for the `warden` binary

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

/// Isolated working directory with no warden.toml and an empty home
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn script(&self, name: &str, source: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, source).unwrap();
        path
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("warden").unwrap();
        cmd.current_dir(self.dir.path())
            .env("HOME", self.dir.path())
            .env_remove("WARDEN_TIER")
            .env_remove("WARDEN_TIMEOUT_MS")
            .env_remove("WARDEN_DIAGNOSTICS");
        cmd
    }
}

// ============================================================================
// run
// ============================================================================

#[test]
fn test_run_prints_return_value() {
    let ws = Workspace::new();
    let file = ws.script("add.wd", "return 2 + 2;");
    ws.cmd()
        .arg("run")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::diff("4\n"));
}

#[test]
fn test_run_entry_with_args() {
    let ws = Workspace::new();
    let file = ws.script("greet.wd", "fn greet(name) { return string.concat(\"hi \", name); }");
    ws.cmd()
        .args(["run", "--entry", "greet", "--arg", "bob"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("hi bob"));
}

#[test]
fn test_run_denied_namespace_fails() {
    let ws = Workspace::new();
    let file = ws.script("net.wd", "return net.http.get(\"x\");");
    ws.cmd()
        .arg("run")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("WD4003"));
}

#[test]
fn test_run_timeout_json() {
    let ws = Workspace::new();
    let file = ws.script("spin.wd", "while true { }");
    let output = ws
        .cmd()
        .args(["run", "--timeout-ms", "100", "--json"])
        .arg(&file)
        .output()
        .unwrap();
    assert!(!output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["state"], "timed_out");
    assert_eq!(json["failure_kind"], "timeout_exceeded");
}

#[test]
fn test_run_tier_from_project_config() {
    let ws = Workspace::new();
    fs::write(
        ws.dir.path().join("warden.toml"),
        "[sandbox]\ndefault_tier = \"standard\"\n",
    )
    .unwrap();
    let file = ws.script("log.wd", "log.info(\"hello\");\nreturn 1;");
    ws.cmd().arg("run").arg(&file).assert().success();
}

#[test]
fn test_run_missing_file() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["run", "nope.wd"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read source file"));
}

// ============================================================================
// check
// ============================================================================

#[test]
fn test_check_clean() {
    let ws = Workspace::new();
    let file = ws.script("ok.wd", "fn f(x) { return x; }");
    ws.cmd()
        .arg("check")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("no errors found"));
}

#[test]
fn test_check_blocked_pattern() {
    let ws = Workspace::new();
    let file = ws.script("path.wd", "let p = \"../../secrets\";");
    ws.cmd()
        .args(["check", "--json"])
        .arg(&file)
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"ok\": false"))
        .stdout(predicate::str::contains("WD4001"));
}

#[test]
fn test_check_invalid_tier() {
    let ws = Workspace::new();
    let file = ws.script("ok.wd", "return 1;");
    ws.cmd()
        .args(["check", "--tier", "root"])
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid --tier"));
}

// ============================================================================
// cache
// ============================================================================

#[test]
fn test_cache_persist_and_warm() {
    let ws = Workspace::new();
    let file = ws.script("a.wd", "return 1;");
    let cache_dir = ws.dir.path().join("cache");

    ws.cmd()
        .args(["cache", "persist", "--dir"])
        .arg(&cache_dir)
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("persisted 1 unit(s)"));

    ws.cmd()
        .args(["cache", "warm", "--dir"])
        .arg(&cache_dir)
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("loaded 1 unit(s), discarded 0, compiled 0"));
}

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("warden")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("cache"))
        .stdout(predicate::str::contains("WARDEN_LOG"));
}
