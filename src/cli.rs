// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `deploycast`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "deploycast",
    version,
    about = "Run a deployment script and stream its progress.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the deployment configuration (JSON).
    #[arg(long, value_name = "PATH", default_value = "deploy-config.json")]
    pub config: String,

    /// Deployment script handed to the shell.
    #[arg(long, value_name = "PATH", default_value = "scripts/setup_and_deploy.sh")]
    pub script: String,

    /// Env-file template with `{{key}}` placeholders.
    #[arg(long, value_name = "PATH", default_value = "deploy.templates.env")]
    pub template: String,

    /// Directory for run logs and history records.
    #[arg(long, value_name = "DIR", default_value = "artifacts/admin-history")]
    pub history_dir: String,

    /// Result artifact the script may write after exit.
    #[arg(long, value_name = "PATH")]
    pub artifact: Option<String>,

    /// Directory for transient rendered env files.
    #[arg(long, value_name = "DIR", default_value = "tmp")]
    pub tmp_dir: String,

    /// Kill the deployment after this many seconds (0 disables the limit).
    #[arg(long, value_name = "SECS")]
    pub timeout_secs: Option<u64>,

    /// Print the latest successful configuration and exit.
    #[arg(long)]
    pub latest: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `DEPLOYCAST_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
