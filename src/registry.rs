// src/registry.rs

//! Single-flight lock and the in-memory run directory.
//!
//! [`RunLock`] guarantees that at most one run is `starting`/`running` at
//! any instant. It is held from the moment a run is accepted until the
//! finalizer has completed — including artifact reconciliation and cleanup —
//! not merely while the subprocess executes.
//!
//! [`RunRegistry`] is the directory of runs seen since process start. It is
//! append-mostly: entries are only removed by the retention sweep, which
//! evicts the oldest *terminal* runs beyond a configured cap. Cross-restart
//! lookups always miss; durable history is the record store's job.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, warn};

use crate::run::{RunHandle, RunId, log_file_path};

/// Process-wide exclusivity guard for deployments.
///
/// Not exposed as a free-standing global: the orchestrator owns the lock and
/// is the only caller of `try_acquire`/`release`.
#[derive(Debug, Default)]
pub struct RunLock {
    held: AtomicBool,
}

impl RunLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to take the lock. Returns false if a run is already in
    /// flight; callers must surface that as a distinct busy signal.
    pub fn try_acquire(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release the lock at the end of finalization.
    pub fn release(&self) {
        let was_held = self.held.swap(false, Ordering::AcqRel);
        if !was_held {
            warn!("run lock released while not held");
        }
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    runs: HashMap<RunId, Arc<RunHandle>>,
    /// Creation order, used by the retention sweep.
    order: VecDeque<RunId>,
}

/// In-memory directory of all retained runs, keyed by run identifier.
///
/// Cheap to clone; all clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a new run with a fresh identifier. The log file
    /// lives under `history_dir`, named after the run id.
    pub fn create(&self, history_dir: &Path) -> Arc<RunHandle> {
        let id = RunId::generate();
        let handle = Arc::new(RunHandle::new(
            id.clone(),
            Utc::now(),
            log_file_path(history_dir, &id),
        ));

        let mut inner = self.inner.lock().expect("registry poisoned");
        inner.runs.insert(id.clone(), Arc::clone(&handle));
        inner.order.push_back(id);
        handle
    }

    pub fn get(&self, id: &RunId) -> Option<Arc<RunHandle>> {
        self.inner.lock().expect("registry poisoned").runs.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("registry poisoned").runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict oldest terminal runs until at most `retain` terminal entries
    /// remain. Active runs are never evicted, regardless of age.
    pub fn evict_terminal(&self, retain: usize) {
        let mut inner = self.inner.lock().expect("registry poisoned");

        let terminal_count = inner
            .order
            .iter()
            .filter(|id| inner.runs.get(*id).is_some_and(|r| r.is_terminal()))
            .count();
        let mut excess = terminal_count.saturating_sub(retain);
        if excess == 0 {
            return;
        }

        let mut kept = VecDeque::with_capacity(inner.order.len());
        let order = std::mem::take(&mut inner.order);
        for id in order {
            let terminal = inner.runs.get(&id).is_some_and(|r| r.is_terminal());
            if excess > 0 && terminal {
                inner.runs.remove(&id);
                excess -= 1;
                debug!(run_id = %id, "evicted terminal run from registry");
            } else {
                kept.push_back(id);
            }
        }
        inner.order = kept;
    }
}
