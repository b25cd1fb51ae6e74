//! Change notifications for display clients.
//!
//! Publishing never blocks and never fails: with no subscribers the update is dropped,
//! and a subscriber that falls behind skips ahead (`RecvError::Lagged`).

use serde::Serialize;
use tokio::sync::broadcast;

use crate::types::{ActivityRecord, PromptRecord};

const DEFAULT_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum MonitorUpdate {
    ActivityCreated(ActivityRecord),
    ActivityUpdated(ActivityRecord),
    PromptUpdated(PromptRecord),
    Cleared { removed: usize },
}

impl MonitorUpdate {
    pub fn event_name(&self) -> &'static str {
        match self {
            MonitorUpdate::ActivityCreated(_) => "activity_created",
            MonitorUpdate::ActivityUpdated(_) => "activity_updated",
            MonitorUpdate::PromptUpdated(_) => "prompt_updated",
            MonitorUpdate::Cleared { .. } => "cleared",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<MonitorUpdate>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

impl Notifier {
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self { tx }
    }

    pub fn publish(&self, update: MonitorUpdate) {
        let event = update.event_name();
        match self.tx.send(update) {
            Ok(receivers) => tracing::trace!(event, receivers, "Published update"),
            Err(_) => tracing::trace!(event, "No subscribers for update"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorUpdate> {
        self.tx.subscribe()
    }
}
