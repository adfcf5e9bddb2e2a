// src/exec/backend.rs

//! Pluggable deploy backend abstraction.
//!
//! The orchestrator talks to a [`DeployBackend`] instead of spawning
//! processes directly. This makes it easy to swap in a fake backend in tests
//! while keeping the production process handling in [`ShellDeployBackend`].

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use std::process::Stdio;
use tracing::{info, warn};

use crate::run::{LogStream, RunId};

/// Environment variable carrying the rendered input file path into the
/// external process.
pub const DEPLOY_ENV_FILE_VAR: &str = "DEPLOY_ENV_FILE";

/// Events a backend feeds into the log pump while a run executes.
///
/// `Started` precedes all lines and marks the `starting -> running`
/// transition; `Line` carries one line of process output.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecEvent {
    Started,
    Line { stream: LogStream, line: String },
}

/// Everything a backend needs to execute one run.
#[derive(Debug)]
pub struct DeployContext {
    pub run_id: RunId,
    /// Rendered input file, injected via [`DEPLOY_ENV_FILE_VAR`].
    pub env_file: PathBuf,
    /// Feed for the log pump. Dropped when the backend settles, which lets
    /// the pump flush and close the log file.
    pub events: mpsc::Sender<ExecEvent>,
}

/// How a deployment attempt settled. All variants are handed to the
/// finalizer; none crash the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum DeployOutcome {
    /// Clean process exit. `-1` stands in for signal death without a code.
    Exited(i32),
    /// The process could not start at all (e.g. missing binary).
    SpawnFailed(String),
    /// I/O error while reading process output.
    StreamFailed(String),
    /// The run timeout elapsed and the process was killed.
    TimedOut(Duration),
}

/// Trait abstracting how a deployment is executed.
///
/// Production code uses [`ShellDeployBackend`]; tests provide their own
/// implementation that emits scripted events and outcomes.
#[async_trait]
pub trait DeployBackend: Send + Sync {
    /// Execute one deployment to settlement. Must not panic; every failure
    /// mode maps to a [`DeployOutcome`].
    async fn run(&self, ctx: DeployContext) -> DeployOutcome;
}

/// Real backend: runs `<shell> <script>` with the env file path injected
/// through the process environment.
#[derive(Debug, Clone)]
pub struct ShellDeployBackend {
    script: PathBuf,
    shell: PathBuf,
    workdir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl ShellDeployBackend {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
            shell: PathBuf::from("bash"),
            workdir: None,
            timeout: None,
        }
    }

    /// Interpreter to run the script with (default `bash`).
    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    /// Kill the process and fail the run after this long.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl DeployBackend for ShellDeployBackend {
    async fn run(&self, ctx: DeployContext) -> DeployOutcome {
        info!(
            run_id = %ctx.run_id,
            script = %self.script.display(),
            env_file = %ctx.env_file.display(),
            "starting deployment process"
        );

        let mut cmd = Command::new(&self.shell);
        cmd.arg(&self.script)
            .env(DEPLOY_ENV_FILE_VAR, &ctx.env_file)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return DeployOutcome::SpawnFailed(format!(
                    "spawning {} {}: {e}",
                    self.shell.display(),
                    self.script.display()
                ));
            }
        };

        // The pump only consumes; a send can only fail if the pump died,
        // in which case the run still settles through `wait` below.
        let _ = ctx.events.send(ExecEvent::Started).await;

        let stdout_reader = child
            .stdout
            .take()
            .map(|out| spawn_line_reader(out, LogStream::Stdout, ctx.events.clone()));
        let stderr_reader = child
            .stderr
            .take()
            .map(|err| spawn_line_reader(err, LogStream::Stderr, ctx.events.clone()));
        // Readers hold their own sender clones from here on.
        drop(ctx.events);

        let waited = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(waited) => waited,
                Err(_) => {
                    warn!(
                        run_id = %ctx.run_id,
                        timeout_secs = limit.as_secs(),
                        "deployment timed out; killing process"
                    );
                    if let Err(e) = child.kill().await {
                        warn!(run_id = %ctx.run_id, error = %e, "failed to kill timed-out process");
                    }
                    // Orphaned grandchildren may keep the pipes open, so the
                    // readers are aborted rather than awaited.
                    abort_readers(stdout_reader, stderr_reader);
                    return DeployOutcome::TimedOut(limit);
                }
            },
            None => child.wait().await,
        };

        let status = match waited {
            Ok(status) => status,
            Err(e) => {
                drain_readers(stdout_reader, stderr_reader).await;
                return DeployOutcome::StreamFailed(format!("waiting for process: {e}"));
            }
        };

        // Let both streams drain fully before settling so the pump sees
        // every line ahead of finalization.
        let stream_error = drain_readers(stdout_reader, stderr_reader).await;

        let code = status.code().unwrap_or(-1);
        info!(
            run_id = %ctx.run_id,
            exit_code = code,
            success = status.success(),
            "deployment process exited"
        );

        match stream_error {
            Some(e) => DeployOutcome::StreamFailed(e),
            None => DeployOutcome::Exited(code),
        }
    }
}

type ReaderHandle = tokio::task::JoinHandle<std::io::Result<()>>;

fn spawn_line_reader(
    stream: impl AsyncRead + Unpin + Send + 'static,
    kind: LogStream,
    events: mpsc::Sender<ExecEvent>,
) -> ReaderHandle {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if events
                        .send(ExecEvent::Line { stream: kind, line })
                        .await
                        .is_err()
                    {
                        // Pump gone; nothing left to deliver to.
                        return Ok(());
                    }
                }
                Ok(None) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    })
}

fn abort_readers(stdout: Option<ReaderHandle>, stderr: Option<ReaderHandle>) {
    for handle in [stdout, stderr].into_iter().flatten() {
        handle.abort();
    }
}

/// Await both reader tasks, returning the first stream error if any.
async fn drain_readers(
    stdout: Option<ReaderHandle>,
    stderr: Option<ReaderHandle>,
) -> Option<String> {
    let mut first_error = None;
    for (name, reader) in [("stdout", stdout), ("stderr", stderr)] {
        let Some(handle) = reader else { continue };
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(stream = name, error = %e, "error reading process output");
                first_error.get_or_insert(format!("reading {name}: {e}"));
            }
            Err(e) => {
                warn!(stream = name, error = %e, "output reader task failed");
                first_error.get_or_insert(format!("{name} reader task: {e}"));
            }
        }
    }
    first_error
}
