// src/orchestrator.rs

//! Public orchestrator API.
//!
//! `start_run` returns a run identifier immediately; execution proceeds as
//! an independent background task whose lifetime is not tied to the caller
//! (fire-and-forget with durable follow-up via subscription). The
//! single-flight lock is the sole shared-mutation gate: it is taken before
//! the run is registered and released only when finalization completes.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::{DeployConfig, OrchestratorOptions};
use crate::errors::{DeploycastError, Result};
use crate::exec::{DeployBackend, DeployContext, DeployOutcome};
use crate::exec::pump::spawn_pump;
use crate::finalize::{RunCompletion, finalize_run};
use crate::hub::SubscriberHub;
use crate::registry::{RunLock, RunRegistry};
use crate::render::EnvRenderer;
use crate::run::{RunEvent, RunHandle, RunId};
use crate::store::RunRecordStore;

/// The deployment run orchestrator. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    lock: RunLock,
    registry: RunRegistry,
    hub: SubscriberHub,
    backend: Arc<dyn DeployBackend>,
    renderer: Arc<dyn EnvRenderer>,
    store: Arc<dyn RunRecordStore>,
    options: OrchestratorOptions,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn DeployBackend>,
        renderer: Arc<dyn EnvRenderer>,
        store: Arc<dyn RunRecordStore>,
        options: OrchestratorOptions,
    ) -> Self {
        let registry = RunRegistry::new();
        let hub = SubscriberHub::new(registry.clone(), options.retry_hint_ms);
        Self {
            inner: Arc::new(Inner {
                lock: RunLock::new(),
                registry,
                hub,
                backend,
                renderer,
                store,
                options,
            }),
        }
    }

    /// Accept a new deployment run, or reject with [`DeploycastError::Busy`]
    /// if one is already in flight.
    ///
    /// On acceptance the run is registered and a background task drives it
    /// to completion; the returned id can be used to subscribe. Must be
    /// called from within a tokio runtime.
    pub fn start_run(&self, config: DeployConfig) -> Result<RunId> {
        let inner = &self.inner;
        if !inner.lock.try_acquire() {
            return Err(DeploycastError::Busy);
        }

        let run = inner.registry.create(&inner.options.history_dir);
        info!(run_id = %run.id, "deployment run accepted");

        let inner = Arc::clone(&self.inner);
        let id = run.id.clone();
        tokio::spawn(async move {
            drive_run(inner, run, config).await;
        });

        Ok(id)
    }

    /// Attach an observer channel to a run. `None` when the run id is
    /// unknown (including after restart or eviction); the caller should
    /// treat that as not-found.
    pub fn attach_subscriber(
        &self,
        run_id: &RunId,
        tx: mpsc::Sender<RunEvent>,
    ) -> Option<Arc<RunHandle>> {
        self.inner.hub.attach(run_id, tx)
    }

    pub fn get_run(&self, run_id: &RunId) -> Option<Arc<RunHandle>> {
        self.inner.registry.get(run_id)
    }

    /// Whether a run is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.inner.lock.is_held()
    }

    /// Configuration of the most recent successful run, if any.
    pub async fn load_latest_success(&self) -> Result<Option<DeployConfig>> {
        self.inner.store.load_latest_success().await
    }
}

/// Background task for one run: render the input file, execute the backend,
/// finalize. Every failure path converges on `finalize_run`, which releases
/// the lock.
async fn drive_run(inner: Arc<Inner>, run: Arc<RunHandle>, config: DeployConfig) {
    let env_file = match inner.renderer.render(&run.id, &config).await {
        Ok(path) => path,
        Err(e) => {
            warn!(run_id = %run.id, error = %e, "failed to prepare deployment input file");
            finalize_run(
                RunCompletion {
                    run,
                    config,
                    outcome: None,
                    setup_error: Some(format!("preparing input file: {e}")),
                    pump: None,
                    env_file: None,
                },
                &inner.hub,
                inner.store.as_ref(),
                &inner.lock,
                &inner.registry,
                &inner.options,
            )
            .await;
            return;
        }
    };

    let (events_tx, events_rx) = mpsc::channel(inner.options.line_buffer);
    let pump = spawn_pump(Arc::clone(&run), inner.hub.clone(), events_rx);

    let backend_run = inner.backend.run(DeployContext {
        run_id: run.id.clone(),
        env_file: env_file.clone(),
        events: events_tx,
    });

    // The run timeout is enforced here, not delegated to the backend, so a
    // wedged backend of any kind frees the single-flight lock. Dropping the
    // backend future tears down its process (`kill_on_drop`) and its event
    // senders, which in turn lets the pump drain and close.
    let outcome = match inner.options.run_timeout {
        Some(limit) => match tokio::time::timeout(limit, backend_run).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    run_id = %run.id,
                    timeout_secs = limit.as_secs(),
                    "deployment run exceeded its time limit; abandoning backend"
                );
                DeployOutcome::TimedOut(limit)
            }
        },
        None => backend_run.await,
    };

    finalize_run(
        RunCompletion {
            run,
            config,
            outcome: Some(outcome),
            setup_error: None,
            pump: Some(pump),
            env_file: Some(env_file),
        },
        &inner.hub,
        inner.store.as_ref(),
        &inner.lock,
        &inner.registry,
        &inner.options,
    )
    .await;
}
