// src/run.rs

//! Run data model: identifiers, status, the mutable in-memory run handle,
//! the immutable finalized record, and the event wire contract.
//!
//! A [`RunHandle`] is owned by the registry for as long as the run is
//! retained; everything a subscriber observes is derived from it. Once a run
//! reaches a terminal state its [`RunRecord`] snapshot is the source of
//! truth and never mutated again.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::DeployConfig;

/// Opaque unique run identifier, generated at creation and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Generate a fresh identifier backed by 128 bits of randomness.
    pub fn generate() -> Self {
        RunId(format!("deploy-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        RunId(s.to_string())
    }
}

/// Lifecycle status of a run.
///
/// Transitions only `starting -> running -> {success|failed}`; `failed` may
/// also be reached directly from `starting` when the process never spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Starting,
    Running,
    Success,
    Failed,
}

impl RunStatus {
    /// `success` and `failed` are sticky: once reached, the status never
    /// changes again.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed)
    }
}

/// Which output stream of the external process a log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    /// Tag used when appending the line to the durable log file.
    pub fn tag(self) -> &'static str {
        match self {
            LogStream::Stdout => "STDOUT",
            LogStream::Stderr => "STDERR",
        }
    }
}

/// Point-in-time snapshot of a run's status, as pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusFrame {
    pub run_id: RunId,
    pub status: RunStatus,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A single line of process output, tagged with its origin stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogFrame {
    pub stream: LogStream,
    pub line: String,
    pub timestamp: DateTime<Utc>,
}

/// Stable summary of one deployed contract, reduced from the result
/// artifact. `gas_used` is kept as raw JSON: hardhat emits it as a number or
/// a decimal string depending on version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContractSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ballot: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposals: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pledges: Option<serde_json::Value>,
}

/// Immutable record of a finished run. Built exactly once at finalization
/// and persisted via the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub run_id: RunId,
    pub status: RunStatus,
    pub exit_code: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub logs_path: PathBuf,
    pub config: DeployConfig,
    pub contracts: Option<BTreeMap<String, ContractSummary>>,
    pub error: Option<String>,
    /// Alias of `completed_at`, kept for consumers that key history on a
    /// single timestamp field.
    pub timestamp: DateTime<Utc>,
}

/// A discrete push message delivered to subscribers.
///
/// `comment` and `retry` precede the initial `status` replay on attach; the
/// terminal `status`/`result` pair closes out every run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum RunEvent {
    Comment(String),
    #[serde(rename_all = "camelCase")]
    Retry {
        retry_ms: u64,
    },
    Status(StatusFrame),
    Log(LogFrame),
    Result(RunRecord),
}

impl RunEvent {
    /// Wire name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            RunEvent::Comment(_) => "comment",
            RunEvent::Retry { .. } => "retry",
            RunEvent::Status(_) => "status",
            RunEvent::Log(_) => "log",
            RunEvent::Result(_) => "result",
        }
    }
}

/// One attached observer channel.
#[derive(Debug, Clone)]
pub(crate) struct Subscriber {
    pub(crate) id: u64,
    pub(crate) tx: mpsc::Sender<RunEvent>,
}

#[derive(Debug)]
struct RunState {
    status: RunStatus,
    exit_code: Option<i32>,
    error: Option<String>,
    completed_at: Option<DateTime<Utc>>,
    record: Option<RunRecord>,
}

/// Mutable in-memory state of one run, shared as `Arc<RunHandle>` between
/// the registry, the executor, the hub and the finalizer.
///
/// All mutation goes through short, non-async critical sections; nothing
/// holds the internal locks across an await point.
#[derive(Debug)]
pub struct RunHandle {
    pub id: RunId,
    pub created_at: DateTime<Utc>,
    /// Durable append-only transcript for this run.
    pub log_path: PathBuf,
    state: Mutex<RunState>,
    pub(crate) subscribers: Mutex<Vec<Subscriber>>,
}

impl RunHandle {
    pub(crate) fn new(id: RunId, created_at: DateTime<Utc>, log_path: PathBuf) -> Self {
        Self {
            id,
            created_at,
            log_path,
            state: Mutex::new(RunState {
                status: RunStatus::Starting,
                exit_code: None,
                error: None,
                completed_at: None,
                record: None,
            }),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn status(&self) -> RunStatus {
        self.state.lock().expect("run state poisoned").status
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Current status snapshot in wire shape.
    pub fn status_frame(&self) -> StatusFrame {
        let state = self.state.lock().expect("run state poisoned");
        StatusFrame {
            run_id: self.id.clone(),
            status: state.status,
            exit_code: state.exit_code,
            error: state.error.clone(),
            created_at: self.created_at,
            completed_at: state.completed_at,
        }
    }

    /// The finalized record, if the run has reached a terminal state.
    pub fn record(&self) -> Option<RunRecord> {
        self.state.lock().expect("run state poisoned").record.clone()
    }

    /// Transition `starting -> running`. Returns false (and leaves the state
    /// untouched) if the run already moved past `starting`.
    pub(crate) fn mark_running(&self) -> bool {
        let mut state = self.state.lock().expect("run state poisoned");
        if state.status == RunStatus::Starting {
            state.status = RunStatus::Running;
            true
        } else {
            false
        }
    }

    /// Apply the terminal outcome and attach the immutable record.
    ///
    /// Returns false if the run was already terminal; terminal states are
    /// sticky and a second completion is ignored.
    pub(crate) fn complete(&self, record: RunRecord) -> bool {
        let mut state = self.state.lock().expect("run state poisoned");
        if state.status.is_terminal() {
            return false;
        }
        state.status = record.status;
        state.exit_code = record.exit_code;
        state.error = record.error.clone();
        state.completed_at = Some(record.completed_at);
        state.record = Some(record);
        true
    }
}

/// Log file location for a run, under the history directory.
pub(crate) fn log_file_path(history_dir: &Path, id: &RunId) -> PathBuf {
    history_dir.join(format!("{id}.log"))
}
