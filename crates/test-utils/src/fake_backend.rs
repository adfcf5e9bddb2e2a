use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use deploycast::exec::{DeployBackend, DeployContext, DeployOutcome, ExecEvent};
use deploycast::run::LogStream;

/// What a [`FakeDeployBackend`] should do for each run.
#[derive(Debug, Clone)]
pub struct FakeScript {
    /// Whether to emit the `Started` marker (a spawn failure never starts).
    pub starts: bool,
    /// Lines to emit after starting.
    pub lines: Vec<(LogStream, String)>,
    /// How the run settles.
    pub outcome: DeployOutcome,
    /// Optional pause between `Started` and the first line, giving tests
    /// room to attach before output begins.
    pub warmup: Option<Duration>,
    /// Optional pause before settling, to keep the run observable mid-flight.
    pub hold: Option<Duration>,
}

impl FakeScript {
    /// Clean success with the given stdout lines.
    pub fn success(lines: &[&str]) -> Self {
        Self {
            starts: true,
            lines: lines
                .iter()
                .map(|l| (LogStream::Stdout, l.to_string()))
                .collect(),
            outcome: DeployOutcome::Exited(0),
            warmup: None,
            hold: None,
        }
    }

    pub fn exit_code(code: i32) -> Self {
        Self {
            starts: true,
            lines: Vec::new(),
            outcome: DeployOutcome::Exited(code),
            warmup: None,
            hold: None,
        }
    }

    pub fn spawn_failure(message: &str) -> Self {
        Self {
            starts: false,
            lines: Vec::new(),
            outcome: DeployOutcome::SpawnFailed(message.to_string()),
            warmup: None,
            hold: None,
        }
    }

    pub fn with_line(mut self, stream: LogStream, line: &str) -> Self {
        self.lines.push((stream, line.to_string()));
        self
    }

    /// Wait for `duration` after `Started` before emitting any line.
    pub fn with_warmup(mut self, duration: Duration) -> Self {
        self.warmup = Some(duration);
        self
    }

    /// Keep the run in flight for `duration` before settling.
    pub fn with_hold(mut self, duration: Duration) -> Self {
        self.hold = Some(duration);
        self
    }
}

/// A fake deploy backend that:
/// - records the env file path of each run it was given
/// - replays a scripted sequence of events and a scripted outcome,
///   without spawning any real process.
pub struct FakeDeployBackend {
    script: FakeScript,
    env_files: Arc<Mutex<Vec<std::path::PathBuf>>>,
}

impl FakeDeployBackend {
    pub fn new(script: FakeScript) -> Self {
        Self {
            script,
            env_files: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared view of the env files handed to this backend, one per run.
    pub fn env_files(&self) -> Arc<Mutex<Vec<std::path::PathBuf>>> {
        Arc::clone(&self.env_files)
    }
}

#[async_trait]
impl DeployBackend for FakeDeployBackend {
    async fn run(&self, ctx: DeployContext) -> DeployOutcome {
        {
            let mut guard = self.env_files.lock().unwrap();
            guard.push(ctx.env_file.clone());
        }

        if self.script.starts {
            let _ = ctx.events.send(ExecEvent::Started).await;
        }
        if let Some(warmup) = self.script.warmup {
            tokio::time::sleep(warmup).await;
        }
        for (stream, line) in &self.script.lines {
            let _ = ctx
                .events
                .send(ExecEvent::Line {
                    stream: *stream,
                    line: line.clone(),
                })
                .await;
        }
        if let Some(hold) = self.script.hold {
            tokio::time::sleep(hold).await;
        }

        self.script.outcome.clone()
    }
}

/// A backend that stays in flight until told to finish, for tests that need
/// a run pinned in the `running` state.
pub struct HeldDeployBackend {
    release: Mutex<Option<tokio::sync::oneshot::Receiver<DeployOutcome>>>,
}

impl HeldDeployBackend {
    /// Returns the backend and the sender that settles the run.
    pub fn new() -> (Self, tokio::sync::oneshot::Sender<DeployOutcome>) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        (
            Self {
                release: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

#[async_trait]
impl DeployBackend for HeldDeployBackend {
    async fn run(&self, ctx: DeployContext) -> DeployOutcome {
        let rx = self
            .release
            .lock()
            .unwrap()
            .take()
            .expect("HeldDeployBackend supports a single run");
        let _ = ctx.events.send(ExecEvent::Started).await;
        let events = ctx.events;
        let outcome = rx.await.unwrap_or(DeployOutcome::Exited(0));
        drop(events);
        outcome
    }
}
