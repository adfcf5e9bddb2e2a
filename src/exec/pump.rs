// src/exec/pump.rs

//! Single-writer log pump.
//!
//! Both stream readers feed one bounded channel drained by this task, so
//! writes to the shared log file are serialized (no interleave corruption)
//! while each stream's own line order is preserved end-to-end: reader ->
//! file append -> broadcast.
//!
//! The pump also owns the `starting -> running` transition: the backend's
//! `Started` marker arrives on the same channel, ahead of any line, so
//! subscribers always observe `running` before the first `log` event.

use std::sync::Arc;

use chrono::Utc;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::exec::ExecEvent;
use crate::hub::SubscriberHub;
use crate::run::{LogFrame, RunEvent, RunHandle};

/// Spawn the pump for one run. The returned handle resolves once the event
/// channel closes and the log file is flushed; `Err` means lines were lost
/// to a write failure (a stream failure for the finalizer).
pub(crate) fn spawn_pump(
    run: Arc<RunHandle>,
    hub: SubscriberHub,
    rx: mpsc::Receiver<ExecEvent>,
) -> JoinHandle<std::io::Result<()>> {
    tokio::spawn(pump(run, hub, rx))
}

async fn pump(
    run: Arc<RunHandle>,
    hub: SubscriberHub,
    mut rx: mpsc::Receiver<ExecEvent>,
) -> std::io::Result<()> {
    let mut writer = match open_log(&run).await {
        Ok(writer) => Some(writer),
        Err(e) => {
            warn!(run_id = %run.id, path = %run.log_path.display(), error = %e, "unable to open run log file");
            // Keep broadcasting even with no durable sink; the write error
            // is reported once the channel drains.
            None
        }
    };
    let mut write_error: Option<std::io::Error> =
        writer.is_none().then(|| std::io::Error::other("log file could not be opened"));

    while let Some(event) = rx.recv().await {
        match event {
            ExecEvent::Started => {
                if run.mark_running() {
                    hub.broadcast_to(&run, RunEvent::Status(run.status_frame()));
                }
            }
            ExecEvent::Line { stream, line } => {
                if let Some(w) = writer.as_mut() {
                    let tagged = format!("[{}] {line}\n", stream.tag());
                    if let Err(e) = w.write_all(tagged.as_bytes()).await {
                        warn!(run_id = %run.id, error = %e, "log file write failed");
                        write_error.get_or_insert(e);
                        writer = None;
                    }
                }
                hub.broadcast_to(
                    &run,
                    RunEvent::Log(LogFrame {
                        stream,
                        line,
                        timestamp: Utc::now(),
                    }),
                );
            }
        }
    }

    // Channel closed: every producer is done. Flush failures here are
    // logged, not escalated; the transcript content is already written.
    if let Some(mut w) = writer {
        if let Err(e) = w.flush().await {
            warn!(run_id = %run.id, error = %e, "log file flush failed");
        }
        if let Err(e) = w.into_inner().sync_all().await {
            warn!(run_id = %run.id, error = %e, "log file sync failed");
        }
    }

    match write_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

async fn open_log(run: &RunHandle) -> std::io::Result<BufWriter<tokio::fs::File>> {
    if let Some(parent) = run.log_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&run.log_path)
        .await?;
    Ok(BufWriter::new(file))
}
