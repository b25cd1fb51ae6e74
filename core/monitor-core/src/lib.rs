//! Monitor Core - event correlation and session hierarchy engine.
//!
//! Receives normalized hook events from an AI coding agent, pairs each tool "begin"
//! with its eventual "end", tracks the prompt hierarchy per session and keeps a
//! diagnostic event graph.
//!
//! ## Components
//!
//! - [`correlation`]: single-use begin/end links with scheduled expiry
//! - [`matching`]: ordered completion matchers
//! - [`registry`]: bounded in-memory activity records
//! - [`store`] / [`write_queue`]: the on-disk log and its serialized writer
//! - [`prompts`]: per-session prompt lifecycle
//! - [`graph`]: per-session event graph
//! - [`service`]: the engine tying them together

pub mod config;
pub mod correlation;
pub mod error;
pub mod graph;
pub mod matching;
pub mod notify;
pub mod prompts;
pub mod registry;
pub mod service;
pub mod store;
pub mod types;
pub mod write_queue;

pub use config::{load_config, monitor_home, MonitorConfig};
pub use error::{MonitorError, Result};
pub use graph::{DagSnapshot, GraphNode, SessionSnapshot, SessionSummary};
pub use matching::MatchStrategy;
pub use notify::{MonitorUpdate, Notifier};
pub use service::{IngestEffect, IngestOutcome, MonitorService};
pub use store::{ActivityLogStore, ActivityLogWriter};
pub use types::{ActivityRecord, ActivityStatus, Metrics, PromptRecord, PromptStatus};
