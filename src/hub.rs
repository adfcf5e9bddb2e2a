// src/hub.rs

//! Per-run subscriber fan-out.
//!
//! Subscribers are bounded mpsc channels, one per observer, so a slow or
//! dead observer can never block the broadcaster: delivery is a non-blocking
//! `try_send`, and any channel that is full, closed, or dropped is pruned on
//! the spot. Delivery is at-most-once and best-effort per channel; the only
//! bridge for a reconnecting observer is the replay-on-attach snapshot.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::registry::RunRegistry;
use crate::run::{RunEvent, RunHandle, RunId, Subscriber};

/// Fans out run events to every channel currently attached to a run.
///
/// Cheap to clone; all clones share the registry and the id counter.
#[derive(Debug, Clone)]
pub struct SubscriberHub {
    registry: RunRegistry,
    next_id: Arc<AtomicU64>,
    retry_hint_ms: u64,
}

impl SubscriberHub {
    pub fn new(registry: RunRegistry, retry_hint_ms: u64) -> Self {
        Self {
            registry,
            next_id: Arc::new(AtomicU64::new(0)),
            retry_hint_ms,
        }
    }

    /// Attach an observer channel to a run.
    ///
    /// Returns `None` when the run id is unknown (including after restart or
    /// eviction). Otherwise registers the channel and immediately replays:
    /// a keep-alive comment, the reconnect hint, the current `status`
    /// snapshot, and — if the run is already terminal — the final `result`.
    /// Historical `log` lines are not replayed.
    pub fn attach(&self, run_id: &RunId, tx: mpsc::Sender<RunEvent>) -> Option<Arc<RunHandle>> {
        let run = self.registry.get(run_id)?;

        let subscriber = Subscriber {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            tx: tx.clone(),
        };
        debug!(run_id = %run.id, subscriber = subscriber.id, "subscriber attached");

        // Registration and replay happen under the subscriber lock, so a
        // concurrent broadcast is ordered entirely before or entirely after
        // the replayed snapshot and the observer never sees a status frame
        // older than one it already received. The sends are non-blocking and
        // only fail if the observer hung up immediately; broadcast pruning
        // handles that case.
        {
            let mut subs = run.subscribers.lock().expect("subscriber set poisoned");
            subs.push(subscriber);
            let _ = tx.try_send(RunEvent::Comment("connected".to_string()));
            let _ = tx.try_send(RunEvent::Retry {
                retry_ms: self.retry_hint_ms,
            });
            let _ = tx.try_send(RunEvent::Status(run.status_frame()));
            if let Some(record) = run.record() {
                let _ = tx.try_send(RunEvent::Result(record));
            }
        }

        Some(run)
    }

    /// Detach a specific observer channel from a run.
    ///
    /// Dead channels are also removed opportunistically on broadcast, so
    /// calling this is an optimisation, not a requirement.
    pub fn detach(&self, run_id: &RunId, tx: &mpsc::Sender<RunEvent>) {
        if let Some(run) = self.registry.get(run_id) {
            let mut subs = run.subscribers.lock().expect("subscriber set poisoned");
            subs.retain(|s| !s.tx.same_channel(tx));
        }
    }

    /// Deliver an event to every subscriber of the run, pruning channels
    /// whose delivery fails.
    pub fn broadcast(&self, run_id: &RunId, event: RunEvent) {
        let Some(run) = self.registry.get(run_id) else {
            return;
        };
        self.broadcast_to(&run, event);
    }

    /// Same as [`broadcast`](Self::broadcast) but with the handle already in
    /// hand (the executor and finalizer hold one).
    pub fn broadcast_to(&self, run: &RunHandle, event: RunEvent) {
        // Snapshot under the lock, deliver outside it, prune after.
        let snapshot: Vec<Subscriber> = {
            let subs = run.subscribers.lock().expect("subscriber set poisoned");
            subs.clone()
        };
        if snapshot.is_empty() {
            return;
        }
        trace!(run_id = %run.id, kind = event.kind(), subscribers = snapshot.len(), "broadcasting event");

        let mut dead: Vec<u64> = Vec::new();
        for sub in &snapshot {
            if sub.tx.is_closed() || sub.tx.try_send(event.clone()).is_err() {
                dead.push(sub.id);
            }
        }

        if !dead.is_empty() {
            let mut subs = run.subscribers.lock().expect("subscriber set poisoned");
            subs.retain(|s| !dead.contains(&s.id));
            debug!(run_id = %run.id, pruned = dead.len(), "pruned dead subscribers");
        }
    }

    /// Number of currently attached subscribers, for tests and diagnostics.
    pub fn subscriber_count(&self, run_id: &RunId) -> usize {
        self.registry
            .get(run_id)
            .map(|run| run.subscribers.lock().expect("subscriber set poisoned").len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use crate::run::{RunEvent, RunRecord, RunStatus};
    use crate::config::DeployConfig;
    use chrono::Utc;

    fn hub_with_run() -> (SubscriberHub, Arc<RunHandle>) {
        let registry = RunRegistry::new();
        let run = registry.create(Path::new("/tmp/history"));
        (SubscriberHub::new(registry, 10_000), run)
    }

    fn terminal_record(run: &RunHandle) -> RunRecord {
        let now = Utc::now();
        RunRecord {
            run_id: run.id.clone(),
            status: RunStatus::Success,
            exit_code: Some(0),
            created_at: run.created_at,
            completed_at: now,
            logs_path: run.log_path.clone(),
            config: DeployConfig::default(),
            contracts: None,
            error: None,
            timestamp: now,
        }
    }

    #[tokio::test]
    async fn attach_unknown_run_returns_none() {
        let (hub, _run) = hub_with_run();
        let (tx, _rx) = mpsc::channel(8);
        assert!(hub.attach(&RunId::from("deploy-nope"), tx).is_none());
    }

    #[tokio::test]
    async fn attach_replays_preamble_and_status() {
        let (hub, run) = hub_with_run();
        let (tx, mut rx) = mpsc::channel(8);

        hub.attach(&run.id, tx).expect("run exists");

        assert!(matches!(rx.recv().await, Some(RunEvent::Comment(_))));
        assert!(matches!(
            rx.recv().await,
            Some(RunEvent::Retry { retry_ms: 10_000 })
        ));
        match rx.recv().await {
            Some(RunEvent::Status(frame)) => {
                assert_eq!(frame.status, RunStatus::Starting);
                assert_eq!(frame.run_id, run.id);
            }
            other => panic!("expected status replay, got {other:?}"),
        }
        // Run is not terminal: no result frame queued.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn attach_after_terminal_replays_status_and_result_once() {
        let (hub, run) = hub_with_run();
        run.complete(terminal_record(&run));

        let (tx, mut rx) = mpsc::channel(8);
        hub.attach(&run.id, tx).expect("run exists");

        let mut statuses = 0;
        let mut results = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                RunEvent::Status(_) => statuses += 1,
                RunEvent::Result(record) => {
                    assert_eq!(record.status, RunStatus::Success);
                    results += 1;
                }
                RunEvent::Comment(_) | RunEvent::Retry { .. } => {}
                RunEvent::Log(_) => panic!("log lines must not be replayed"),
            }
        }
        assert_eq!(statuses, 1);
        assert_eq!(results, 1);
    }

    #[tokio::test]
    async fn broadcast_prunes_dropped_subscribers() {
        let (hub, run) = hub_with_run();

        let (alive_tx, mut alive_rx) = mpsc::channel(8);
        let (dead_tx, dead_rx) = mpsc::channel(8);
        hub.attach(&run.id, alive_tx).unwrap();
        hub.attach(&run.id, dead_tx).unwrap();
        assert_eq!(hub.subscriber_count(&run.id), 2);

        drop(dead_rx);
        hub.broadcast(&run.id, RunEvent::Comment("ping".into()));

        assert_eq!(hub.subscriber_count(&run.id), 1);
        // Drain the replay preamble, then find the ping.
        let mut saw_ping = false;
        while let Ok(event) = alive_rx.try_recv() {
            if matches!(&event, RunEvent::Comment(c) if c == "ping") {
                saw_ping = true;
            }
        }
        assert!(saw_ping);
    }

    #[tokio::test]
    async fn full_channel_is_pruned_not_blocked_on() {
        let (hub, run) = hub_with_run();

        // Capacity 1: the attach preamble already overflows it.
        let (tx, _rx) = mpsc::channel(1);
        hub.attach(&run.id, tx).unwrap();

        hub.broadcast(&run.id, RunEvent::Comment("overflow".into()));
        assert_eq!(hub.subscriber_count(&run.id), 0);
    }

    #[tokio::test]
    async fn detach_removes_only_that_channel() {
        let (hub, run) = hub_with_run();
        let (tx_a, _rx_a) = mpsc::channel(8);
        let (tx_b, _rx_b) = mpsc::channel(8);
        hub.attach(&run.id, tx_a.clone()).unwrap();
        hub.attach(&run.id, tx_b).unwrap();

        hub.detach(&run.id, &tx_a);
        assert_eq!(hub.subscriber_count(&run.id), 1);
    }
}
