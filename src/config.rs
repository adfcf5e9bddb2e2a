// src/config.rs

//! Deployment configuration model and orchestrator options.
//!
//! [`DeployConfig`] is the validated input a caller hands to
//! `Orchestrator::start_run`. It is snapshotted verbatim into the run record
//! and, on success, persisted as the latest-known-good configuration. Field
//! names follow the JSON wire/history format (camelCase).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One ballot proposal with its optional pledge lines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProposalConfig {
    pub name: String,
    #[serde(default)]
    pub pledges: Vec<String>,
}

/// Open/close/announce schedule for a ballot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScheduleConfig {
    pub opens_at: Option<String>,
    pub closes_at: Option<String>,
    pub announces_at: Option<String>,
}

/// Validated input configuration for one deployment run.
///
/// Validation happens upstream; the orchestrator treats the configuration as
/// an opaque-but-typed snapshot and only reads it when rendering the input
/// file for the external process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeployConfig {
    pub ballot_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub schedule: ScheduleConfig,
    pub expected_voters: Option<u64>,
    pub proposals: Vec<ProposalConfig>,
    pub mascot_cid: Option<String>,
    pub verifier_address: Option<String>,
}

/// Default cap on retained terminal runs in the in-memory registry.
pub const DEFAULT_RETAIN_RUNS: usize = 256;

/// Default wall-clock limit for one deployment run.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default reconnect-interval hint sent to subscribers on attach.
pub const DEFAULT_RETRY_HINT_MS: u64 = 10_000;

/// Tunables for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Directory holding per-run log files and JSON history records.
    pub history_dir: PathBuf,

    /// Well-known path the external process may write its result artifact
    /// to. `None` disables artifact reconciliation.
    pub artifact_path: Option<PathBuf>,

    /// How many *terminal* runs to retain in the in-memory registry. Active
    /// runs are never evicted.
    pub retain_runs: usize,

    /// Fail the run after this long, abandoning the backend (a spawned
    /// process is killed when its future drops). `None` waits forever (not
    /// recommended: a hung backend would hold the single-flight lock
    /// indefinitely).
    pub run_timeout: Option<Duration>,

    /// Capacity of the line channel feeding the single-writer log pump.
    pub line_buffer: usize,

    /// Bounded wait for the log pump to flush during finalization.
    pub flush_timeout: Duration,

    /// Reconnect-interval hint sent to subscribers on attach.
    pub retry_hint_ms: u64,
}

impl OrchestratorOptions {
    pub fn new(history_dir: impl Into<PathBuf>) -> Self {
        Self {
            history_dir: history_dir.into(),
            artifact_path: None,
            retain_runs: DEFAULT_RETAIN_RUNS,
            run_timeout: Some(DEFAULT_RUN_TIMEOUT),
            line_buffer: 256,
            flush_timeout: Duration::from_secs(5),
            retry_hint_ms: DEFAULT_RETRY_HINT_MS,
        }
    }

    pub fn with_artifact_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifact_path = Some(path.into());
        self
    }

    pub fn with_retain_runs(mut self, retain: usize) -> Self {
        self.retain_runs = retain;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_timeout = timeout;
        self
    }
}
