// src/finalize.rs

//! Exactly-once finalization of a run.
//!
//! Invoked on backend settlement or on a failure to even begin the run
//! (input file could not be rendered). Order matters: the log pump must be
//! drained before the record is built so `logs_path` always refers to a
//! complete transcript, and the lock is released only after the terminal
//! `status`/`result` pair is broadcast. Persistence and artifact failures
//! are logged, never escalated — the run must reach a terminal, observable
//! state and free the lock no matter what.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{DeployConfig, OrchestratorOptions};
use crate::exec::DeployOutcome;
use crate::hub::SubscriberHub;
use crate::registry::{RunLock, RunRegistry};
use crate::render::remove_env_file;
use crate::run::{RunEvent, RunHandle, RunRecord, RunStatus};
use crate::store::{RunRecordStore, read_artifact_summary};

/// Everything the finalizer needs about how the run ended.
pub(crate) struct RunCompletion {
    pub run: Arc<RunHandle>,
    pub config: DeployConfig,
    /// `None` when the run failed before the backend was ever invoked.
    pub outcome: Option<DeployOutcome>,
    /// Error from render/setup, for runs that never reached the backend.
    pub setup_error: Option<String>,
    /// Log pump handle, if a pump was started for this run.
    pub pump: Option<JoinHandle<std::io::Result<()>>>,
    /// Transient input file to delete, if one was rendered.
    pub env_file: Option<PathBuf>,
}

pub(crate) async fn finalize_run(
    completion: RunCompletion,
    hub: &SubscriberHub,
    store: &dyn RunRecordStore,
    lock: &RunLock,
    registry: &RunRegistry,
    options: &OrchestratorOptions,
) {
    let RunCompletion {
        run,
        config,
        outcome,
        setup_error,
        pump,
        env_file,
    } = completion;

    let (mut status, exit_code, mut run_error) = resolve_outcome(&outcome, setup_error);

    // Wait (bounded) for the log pump so the transcript is complete and
    // closed before the record points at it.
    if let Some(pump) = pump {
        match tokio::time::timeout(options.flush_timeout, pump).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => {
                // Lines were lost: that is a stream failure, not a clean run.
                warn!(run_id = %run.id, error = %e, "log sink reported a write failure");
                status = RunStatus::Failed;
                run_error.get_or_insert(format!("log sink failure: {e}"));
            }
            Ok(Err(e)) => {
                warn!(run_id = %run.id, error = %e, "log pump task failed");
            }
            Err(_) => {
                warn!(
                    run_id = %run.id,
                    timeout_secs = options.flush_timeout.as_secs(),
                    "timed out waiting for log sink to flush"
                );
            }
        }
    }

    let contracts = match &options.artifact_path {
        Some(path) => read_artifact_summary(path).await,
        None => None,
    };

    let completed_at = Utc::now();
    let record = RunRecord {
        run_id: run.id.clone(),
        status,
        exit_code,
        created_at: run.created_at,
        completed_at,
        logs_path: run.log_path.clone(),
        config: config.clone(),
        contracts,
        error: run_error,
        timestamp: completed_at,
    };

    if !run.complete(record.clone()) {
        // Should not happen: finalization runs once per run.
        error!(run_id = %run.id, "run was already terminal at finalization");
        return;
    }
    info!(
        run_id = %run.id,
        status = ?status,
        exit_code = ?exit_code,
        "run finalized"
    );

    if let Err(e) = store.save(&record).await {
        error!(run_id = %run.id, error = %e, "failed to persist run record");
    }
    if status == RunStatus::Success {
        if let Err(e) = store.save_latest_success(&config).await {
            error!(run_id = %run.id, error = %e, "failed to persist latest successful configuration");
        }
    }

    hub.broadcast_to(&run, RunEvent::Status(run.status_frame()));
    hub.broadcast_to(&run, RunEvent::Result(record));

    lock.release();
    registry.evict_terminal(options.retain_runs);

    if let Some(path) = env_file {
        remove_env_file(&path).await;
    }
}

/// Terminal status is `success` iff the process exited with code 0 and no
/// runtime error occurred anywhere in spawn/stream handling.
fn resolve_outcome(
    outcome: &Option<DeployOutcome>,
    setup_error: Option<String>,
) -> (RunStatus, Option<i32>, Option<String>) {
    if let Some(error) = setup_error {
        return (RunStatus::Failed, None, Some(error));
    }
    match outcome {
        Some(DeployOutcome::Exited(0)) => (RunStatus::Success, Some(0), None),
        Some(DeployOutcome::Exited(code)) => (RunStatus::Failed, Some(*code), None),
        Some(DeployOutcome::SpawnFailed(e)) => (RunStatus::Failed, None, Some(e.clone())),
        Some(DeployOutcome::StreamFailed(e)) => (RunStatus::Failed, None, Some(e.clone())),
        Some(DeployOutcome::TimedOut(limit)) => (
            RunStatus::Failed,
            None,
            Some(format!(
                "deployment timed out after {}s and was killed",
                limit.as_secs()
            )),
        ),
        None => (
            RunStatus::Failed,
            None,
            Some("run never started".to_string()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn success_iff_clean_exit() {
        let (status, code, error) = resolve_outcome(&Some(DeployOutcome::Exited(0)), None);
        assert_eq!(status, RunStatus::Success);
        assert_eq!(code, Some(0));
        assert!(error.is_none());

        let (status, code, error) = resolve_outcome(&Some(DeployOutcome::Exited(2)), None);
        assert_eq!(status, RunStatus::Failed);
        assert_eq!(code, Some(2));
        assert!(error.is_none());
    }

    #[test]
    fn spawn_failure_has_error_and_no_exit_code() {
        let (status, code, error) = resolve_outcome(
            &Some(DeployOutcome::SpawnFailed("no such file".into())),
            None,
        );
        assert_eq!(status, RunStatus::Failed);
        assert_eq!(code, None);
        assert_eq!(error.as_deref(), Some("no such file"));
    }

    #[test]
    fn setup_error_overrides_outcome() {
        let (status, code, error) = resolve_outcome(
            &Some(DeployOutcome::Exited(0)),
            Some("template missing".into()),
        );
        assert_eq!(status, RunStatus::Failed);
        assert_eq!(code, None);
        assert_eq!(error.as_deref(), Some("template missing"));
    }

    #[test]
    fn timeout_is_a_described_failure() {
        let (status, _, error) = resolve_outcome(
            &Some(DeployOutcome::TimedOut(Duration::from_secs(90))),
            None,
        );
        assert_eq!(status, RunStatus::Failed);
        assert!(error.unwrap().contains("90s"));
    }
}
