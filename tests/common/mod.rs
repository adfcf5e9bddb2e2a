// tests/common/mod.rs

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use deploycast::config::OrchestratorOptions;
use deploycast::exec::DeployBackend;
use deploycast::orchestrator::Orchestrator;
use deploycast::render::EnvRenderer;
use deploycast::run::{RunEvent, RunHandle, RunId, RunRecord, RunStatus};
use deploycast::store::{FsRecordStore, RunRecordStore};
use deploycast_test_utils::builders::StubEnvRenderer;

pub use deploycast_test_utils::init_tracing;

/// Orchestrator wired to a temp history dir, a stub renderer, and the given
/// backend. Returns the orchestrator; the tempdir guard keeps paths alive.
pub fn orchestrator_with_backend(
    dir: &Path,
    backend: Arc<dyn DeployBackend>,
) -> Orchestrator {
    let renderer: Arc<dyn EnvRenderer> = Arc::new(StubEnvRenderer::new(dir.join("tmp")));
    orchestrator_with(dir, backend, renderer)
}

pub fn orchestrator_with(
    dir: &Path,
    backend: Arc<dyn DeployBackend>,
    renderer: Arc<dyn EnvRenderer>,
) -> Orchestrator {
    let history = dir.join("history");
    let store: Arc<dyn RunRecordStore> = Arc::new(FsRecordStore::new(&history));
    Orchestrator::new(backend, renderer, store, OrchestratorOptions::new(&history))
}

/// Subscribe to the run and collect every event through the terminal
/// `result`, bounded by a timeout so a broken run fails instead of hanging.
pub async fn collect_until_result(
    orchestrator: &Orchestrator,
    run_id: &RunId,
) -> (Vec<RunEvent>, RunRecord) {
    let (tx, mut rx) = mpsc::channel(256);
    orchestrator
        .attach_subscriber(run_id, tx)
        .expect("run should be known to the registry");

    let mut events = Vec::new();
    let record = timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.expect("event channel closed before result");
            let record = match &event {
                RunEvent::Result(record) => Some(record.clone()),
                _ => None,
            };
            events.push(event);
            if let Some(record) = record {
                return record;
            }
        }
    })
    .await
    .expect("run did not settle within 5 seconds");

    (events, record)
}

/// Poll until the run reports the given status.
pub async fn wait_for_status(run: &RunHandle, status: RunStatus) {
    timeout(Duration::from_secs(2), async {
        while run.status() != status {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("run never reached {status:?}"));
}

/// Poll until the orchestrator is idle again; finalization releases the lock
/// right after the result broadcast, so this only bridges a scheduler race.
pub async fn wait_until_idle(orchestrator: &Orchestrator) {
    timeout(Duration::from_secs(2), async {
        while orchestrator.is_busy() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("lock was not released within 2 seconds");
}
