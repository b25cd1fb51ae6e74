//! Record types owned by the engine and persisted or served to display clients.
//!
//! JSON field names are camelCase; the on-disk activity log and the HTTP queries
//! share these shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use agent_monitor_protocol::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Active,
    Completed,
    Failed,
}

/// One tracked tool invocation ("subagent").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub id: String,
    pub session_id: String,
    #[serde(default)]
    pub parent_prompt_id: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub status: ActivityStatus,
    pub description: String,
    #[serde(default)]
    pub tools_used: Vec<String>,
    #[serde(default)]
    pub metrics: Metrics,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub transcript_ref: Option<String>,
}

impl ActivityRecord {
    pub fn is_active(&self) -> bool {
        self.status == ActivityStatus::Active
    }

    /// The tool that opened this record; the first entry of `tools_used`.
    pub fn declared_tool(&self) -> Option<&str> {
        self.tools_used.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptStatus {
    Active,
    Completed,
    Interrupted,
}

/// One user-submitted prompt and its lifecycle within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRecord {
    pub prompt_id: String,
    pub session_id: String,
    pub text: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub status: PromptStatus,
    /// Milliseconds between start and end, once finished.
    #[serde(default)]
    pub duration: Option<i64>,
}

impl PromptRecord {
    pub fn is_active(&self) -> bool {
        self.status == PromptStatus::Active
    }
}

/// Generates a new opaque identifier.
pub(crate) fn new_id() -> String {
    ulid::Ulid::new().to_string().to_lowercase()
}
