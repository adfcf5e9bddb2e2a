// src/lib.rs

pub mod cli;
pub mod config;
pub mod errors;
pub mod exec;
mod finalize;
pub mod hub;
pub mod logging;
pub mod orchestrator;
pub mod registry;
pub mod render;
pub mod run;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::sync::mpsc;
use tracing::info;

use crate::cli::CliArgs;
use crate::config::{DeployConfig, OrchestratorOptions};
use crate::exec::ShellDeployBackend;
use crate::orchestrator::Orchestrator;
use crate::render::TemplateEnvRenderer;
use crate::run::{RunEvent, RunStatus};
use crate::store::FsRecordStore;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - the shell deploy backend
/// - the env-file template renderer
/// - the filesystem history store
/// - the orchestrator
/// then starts a single run, subscribes to it, and prints the event stream
/// to stdout as JSON lines until the run settles.
pub async fn run(args: CliArgs) -> Result<()> {
    let orchestrator = build_orchestrator(&args);

    if args.latest {
        match orchestrator.load_latest_success().await? {
            Some(config) => println!("{}", serde_json::to_string_pretty(&config)?),
            None => println!("no successful deployment recorded yet"),
        }
        return Ok(());
    }

    let config_raw = tokio::fs::read(&args.config)
        .await
        .with_context(|| format!("reading config {}", args.config))?;
    let config: DeployConfig =
        serde_json::from_slice(&config_raw).with_context(|| format!("parsing {}", args.config))?;

    let run_id = orchestrator.start_run(config)?;
    info!(run_id = %run_id, "deployment started");

    let (tx, mut rx) = mpsc::channel(256);
    orchestrator
        .attach_subscriber(&run_id, tx)
        .context("run vanished before subscription")?;

    // The channel closes once we drop our receiver or the process ends;
    // the terminal result frame is our signal to stop reading.
    while let Some(event) = rx.recv().await {
        println!("{}", serde_json::to_string(&event)?);
        if let RunEvent::Result(record) = event {
            return match record.status {
                RunStatus::Success => Ok(()),
                _ => bail!(
                    "deployment {} failed{}",
                    record.run_id,
                    record
                        .error
                        .map(|e| format!(": {e}"))
                        .unwrap_or_default()
                ),
            };
        }
    }

    bail!("event stream ended before the run settled")
}

fn build_orchestrator(args: &CliArgs) -> Orchestrator {
    let timeout = match args.timeout_secs {
        Some(0) => None,
        Some(secs) => Some(Duration::from_secs(secs)),
        None => Some(config::DEFAULT_RUN_TIMEOUT),
    };

    let backend = ShellDeployBackend::new(&args.script).with_timeout(timeout);
    let renderer = TemplateEnvRenderer::new(&args.template, &args.tmp_dir);
    let store = FsRecordStore::new(&args.history_dir);

    let mut options = OrchestratorOptions::new(&args.history_dir).with_run_timeout(timeout);
    if let Some(artifact) = &args.artifact {
        options = options.with_artifact_path(artifact);
    }

    Orchestrator::new(
        Arc::new(backend),
        Arc::new(renderer),
        Arc::new(store),
        options,
    )
}
