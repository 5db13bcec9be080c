use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use warden_config::ConfigLoader;

mod commands;
mod config;

/// Run untrusted Warden scripts inside a sandbox.
///
/// Scripts are statically validated against a permission tier, compiled
/// once per content hash, and executed under time, memory and stack limits.
///
/// EXAMPLES:
///     warden run mod.wd                    Run a script body
///     warden run mod.wd --entry on_tick    Call a named function
///     warden check mod.wd --tier standard  Validate without running
///     warden cache persist --dir .cache mod.wd
///
/// ENVIRONMENT VARIABLES:
///     WARDEN_LOG          Log filter (default: warn)
///     WARDEN_DIAGNOSTICS  Set to 'json' for JSON output by default
///     WARDEN_TIER         Default permission tier
///     WARDEN_TIMEOUT_MS   Default wall-clock limit
#[derive(Parser)]
#[command(name = "warden")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to a warden.toml to use instead of searching upward
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate, compile and execute a script
    ///
    /// EXAMPLES:
    ///     warden run mod.wd
    ///     warden run mod.wd --entry greet --arg '"world"'
    ///     warden run mod.wd --tier elevated --timeout-ms 500 --json
    #[command(visible_alias = "r")]
    Run {
        /// Path to the script
        file: PathBuf,
        /// Function to call; empty runs the script body
        #[arg(long, default_value = "")]
        entry: String,
        /// Permission tier (none, restricted, standard, elevated, advanced, unrestricted)
        #[arg(long)]
        tier: Option<String>,
        /// Wall-clock limit in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Entry argument; JSON literals are parsed, anything else is a string
        #[arg(long = "arg")]
        args: Vec<String>,
        /// Print the execution result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Statically validate and compile a script without running it
    #[command(visible_alias = "c")]
    Check {
        /// Path to the script
        file: PathBuf,
        /// Permission tier to validate against
        #[arg(long)]
        tier: Option<String>,
        /// Print diagnostics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage the on-disk compile cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Load previously persisted units, then compile the given scripts
    Warm {
        /// Cache directory
        #[arg(long)]
        dir: PathBuf,
        /// Scripts to compile after loading
        files: Vec<PathBuf>,
    },
    /// Compile the given scripts and write every cached unit to disk
    Persist {
        /// Cache directory
        #[arg(long)]
        dir: PathBuf,
        /// Scripts to compile
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let cli_config = config::Config::from_env();

    let filter =
        EnvFilter::try_new(&cli_config.log_filter).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    match dispatch(cli, &cli_config) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the command succeeded
fn dispatch(cli: Cli, cli_config: &config::Config) -> Result<bool> {
    let mut loader = ConfigLoader::new();
    let loaded = match &cli.config {
        Some(path) => loader
            .load_from_file(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => loader
            .load_from_directory(&std::env::current_dir()?)
            .context("Failed to load configuration")?,
    };
    let config = loaded.config;

    match cli.command {
        Commands::Run {
            file,
            entry,
            tier,
            timeout_ms,
            args,
            json,
        } => commands::run::run(
            &config,
            commands::run::RunArgs {
                file,
                entry,
                tier,
                timeout_ms,
                args,
                json: json || cli_config.default_json,
            },
        ),
        Commands::Check { file, tier, json } => commands::check::run(
            &config,
            &file,
            tier.as_deref(),
            json || cli_config.default_json,
        ),
        Commands::Cache { action } => match action {
            CacheAction::Warm { dir, files } => commands::cache::warm(&config, &dir, &files),
            CacheAction::Persist { dir, files } => commands::cache::persist(&config, &dir, &files),
        },
    }
}
