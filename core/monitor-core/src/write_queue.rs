//! Serialized persistence for the activity log.
//!
//! A single worker task owns the writer and applies jobs strictly in enqueue order,
//! one at a time. Each caller gets a [`WriteTicket`] that resolves once its own job has
//! been applied. A failed write rejects only that ticket; the worker moves on to the
//! next job.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::error::{MonitorError, Result};
use crate::store::ActivityLogWriter;
use crate::types::ActivityRecord;

struct WriteJob {
    records: Vec<ActivityRecord>,
    reply: oneshot::Sender<Result<()>>,
}

#[derive(Clone)]
pub struct WriteQueue {
    tx: mpsc::UnboundedSender<WriteJob>,
}

/// Resolves when the associated write has been applied (or rejected).
#[must_use = "a write ticket does nothing unless awaited"]
pub struct WriteTicket {
    rx: oneshot::Receiver<Result<()>>,
}

impl WriteTicket {
    pub async fn wait(self) -> Result<()> {
        self.rx.await.map_err(|_| MonitorError::WriteQueueClosed)?
    }
}

impl WriteQueue {
    /// Starts the worker on the current tokio runtime.
    pub fn spawn(writer: Arc<dyn ActivityLogWriter>, settle_delay: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(drain(rx, writer, settle_delay));
        Self { tx }
    }

    /// Enqueues a full snapshot of the log. Never blocks; ordering is fixed at this call.
    pub fn enqueue(&self, records: Vec<ActivityRecord>) -> WriteTicket {
        let (reply, rx) = oneshot::channel();
        if let Err(err) = self.tx.send(WriteJob { records, reply }) {
            // The worker is gone; reply directly so the caller sees the failure.
            let _ = err.0.reply.send(Err(MonitorError::WriteQueueClosed));
        }
        WriteTicket { rx }
    }
}

async fn drain(
    mut rx: mpsc::UnboundedReceiver<WriteJob>,
    writer: Arc<dyn ActivityLogWriter>,
    settle_delay: Duration,
) {
    while let Some(job) = rx.recv().await {
        let WriteJob { records, reply } = job;
        let count = records.len();
        let task_writer = Arc::clone(&writer);
        let result = tokio::task::spawn_blocking(move || task_writer.write(&records))
            .await
            .unwrap_or_else(|err| Err(MonitorError::WriteRejected(err.to_string())));

        match &result {
            Ok(()) => tracing::debug!(records = count, "Activity log written"),
            Err(err) => tracing::warn!(error = %err, "Activity log write failed"),
        }
        let _ = reply.send(result);

        if !settle_delay.is_zero() {
            tokio::time::sleep(settle_delay).await;
        }
    }
    tracing::debug!("Write queue drained and closed");
}
