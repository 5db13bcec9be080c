//! Run command - execute a script inside the sandbox

use anyhow::{Context, Result};
use std::path::PathBuf;
use warden_config::WardenConfig;
use warden_sandbox::{ExecutionResult, PermissionProfile, Sandbox, SecurityEvent, Value};

#[derive(Debug, Default)]
pub struct RunArgs {
    pub file: PathBuf,
    pub entry: String,
    pub tier: Option<String>,
    pub timeout_ms: Option<u64>,
    pub args: Vec<String>,
    pub json: bool,
}

/// Execute a script and report the result
///
/// Returns `Ok(false)` when the script was rejected, failed to compile or
/// did not complete; `Err` is reserved for problems outside the script.
pub fn run(config: &WardenConfig, args: RunArgs) -> Result<bool> {
    let source = super::read_script(&args.file)?;
    let script_id = super::script_id(&args.file);

    let mut config = config.clone();
    if let Some(ms) = args.timeout_ms {
        config.sandbox.timeout_ms = Some(ms);
    }
    config.validate().context("Invalid --timeout-ms")?;

    let tier = super::parse_tier(args.tier.as_deref())?;
    let profile = PermissionProfile::from_config(script_id.clone(), tier, &config)
        .context("Failed to build permission profile")?;
    let sandbox = Sandbox::from_config(&config).context("Failed to create sandbox")?;
    let values = args.args.iter().map(|a| parse_arg(a)).collect();

    tracing::debug!(script_id = %script_id, tier = %profile.tier(), "running script");
    let result = sandbox.execute_script(&source, &args.entry, values, &profile);

    if args.json {
        println!("{}", result.to_json_string()?);
    } else {
        print_result(&result, &script_id);
    }
    Ok(result.success)
}

fn print_result(result: &ExecutionResult, file: &str) {
    super::print_diagnostics(&result.diagnostics, file);
    for event in undiagnosed_events(result) {
        eprintln!(
            "{}: {}: [{}] {}",
            file,
            event.category.as_str(),
            event.code,
            event.message
        );
    }
    if result.success {
        if let Some(value) = &result.return_value {
            if !matches!(value, Value::Null) {
                println!("{}", value);
            }
        }
    } else {
        eprintln!(
            "{}: script {} after {:.1}ms",
            file,
            result.state,
            result.elapsed.as_secs_f64() * 1000.0
        );
    }
}

/// Events whose code no diagnostic already reports
fn undiagnosed_events(result: &ExecutionResult) -> impl Iterator<Item = &SecurityEvent> {
    result.security_events.iter().filter(|event| {
        !result
            .diagnostics
            .iter()
            .any(|diagnostic| diagnostic.code == event.code)
    })
}

/// Parse a `--arg` value: JSON scalars and arrays become script values,
/// anything that is not valid JSON is passed as a string
pub fn parse_arg(raw: &str) -> Value {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(json) => from_json(json).unwrap_or_else(|| Value::string(raw)),
        Err(_) => Value::string(raw),
    }
}

fn from_json(json: serde_json::Value) -> Option<Value> {
    Some(match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64()?),
        },
        serde_json::Value::String(s) => Value::string(s),
        serde_json::Value::Array(items) => {
            Value::array(items.into_iter().map(from_json).collect::<Option<Vec<_>>>()?)
        }
        serde_json::Value::Object(_) => return None,
    })
}
