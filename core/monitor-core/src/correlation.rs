//! Short-lived links between a tool "begin" and its eventual "end".
//!
//! Upstream begin/end notifications share no identifier, so a begin registers a fresh
//! correlation id under `(session, tool, description)` and the matching end consumes
//! it. Entries are single-use and expire after a fixed window; expiry is scheduled per
//! entry rather than polled, with a lazy check on lookup as a backstop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_monitor_protocol::NormalizedEvent;
use tokio::time::Instant;

use crate::types::new_id;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    pub session_id: String,
    pub tool_name: String,
    pub description: String,
}

impl CorrelationKey {
    pub fn new(session_id: &str, tool_name: &str, description: Option<&str>) -> Self {
        Self {
            session_id: session_id.to_string(),
            tool_name: tool_name.to_string(),
            description: description.unwrap_or_default().to_string(),
        }
    }

    pub fn for_event(event: &NormalizedEvent) -> Self {
        Self::new(
            &event.session_id,
            declared_tool(event),
            event.description.as_deref(),
        )
    }
}

const UNKNOWN_TOOL: &str = "unknown";

/// The tool an event speaks for: its tool name, else its description.
pub(crate) fn declared_tool(event: &NormalizedEvent) -> &str {
    event
        .tool_name
        .as_deref()
        .or(event.description.as_deref())
        .unwrap_or(UNKNOWN_TOOL)
}

#[derive(Debug, Clone)]
struct Entry {
    correlation_id: String,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct CorrelationStore {
    entries: HashMap<CorrelationKey, Entry>,
    ttl: Duration,
}

pub type SharedCorrelationStore = Arc<Mutex<CorrelationStore>>;

impl CorrelationStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Stores a new correlation id for `key`. A pending entry under the same key is
    /// overwritten (last begin wins).
    pub fn register(&mut self, key: CorrelationKey, now: Instant) -> String {
        let correlation_id = new_id();
        let entry = Entry {
            correlation_id: correlation_id.clone(),
            expires_at: now + self.ttl,
        };
        if let Some(previous) = self.entries.insert(key.clone(), entry) {
            tracing::debug!(
                session_id = %key.session_id,
                tool = %key.tool_name,
                replaced = %previous.correlation_id,
                "Correlation entry overwritten by a newer begin"
            );
        }
        correlation_id
    }

    /// Removes and returns the correlation id for `key` if it has not expired.
    pub fn consume(&mut self, key: &CorrelationKey, now: Instant) -> Option<String> {
        let entry = self.entries.remove(key)?;
        if now >= entry.expires_at {
            tracing::debug!(
                session_id = %key.session_id,
                tool = %key.tool_name,
                "Correlation entry expired before its end event"
            );
            return None;
        }
        Some(entry.correlation_id)
    }

    /// Scheduled removal. Only removes the entry if it still holds `correlation_id`,
    /// so the timer of an overwritten entry leaves the newer one alone.
    pub fn expire(&mut self, key: &CorrelationKey, correlation_id: &str) -> bool {
        let matches = self
            .entries
            .get(key)
            .map(|entry| entry.correlation_id == correlation_id)
            .unwrap_or(false);
        if matches {
            self.entries.remove(key);
        }
        matches
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Spawns the scheduled removal for a freshly registered entry.
pub fn schedule_expiry(store: &SharedCorrelationStore, key: CorrelationKey, correlation_id: String) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        // No runtime (plain unit tests); the lazy check in `consume` still applies.
        return;
    };
    let ttl = lock(store).ttl();
    let store = Arc::clone(store);
    handle.spawn(async move {
        tokio::time::sleep(ttl).await;
        if lock(&store).expire(&key, &correlation_id) {
            tracing::debug!(
                session_id = %key.session_id,
                tool = %key.tool_name,
                "Correlation entry expired"
            );
        }
    });
}

fn lock(store: &SharedCorrelationStore) -> std::sync::MutexGuard<'_, CorrelationStore> {
    store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
