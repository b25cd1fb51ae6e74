//! The monitor engine.
//!
//! One [`MonitorService`] is built at daemon start and shared by handle. Every event is
//! applied under a single state lock with no await points inside; persistence is
//! enqueued before the lock is released, so the log is written in processing order.
//! The caller then awaits its own write outside the lock.
//!
//! Lock order is state → correlation store.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use agent_monitor_protocol::{EventKind, NormalizedEvent};
use chrono::{DateTime, Utc};

use crate::config::MonitorConfig;
use crate::correlation::{
    declared_tool, schedule_expiry, CorrelationKey, CorrelationStore, SharedCorrelationStore,
};
use crate::error::Result;
use crate::graph::{DagSnapshot, EventGraph, GraphNode, SessionSnapshot, SessionSummary};
use crate::matching::{CompletionProbe, MatchStrategy};
use crate::notify::{MonitorUpdate, Notifier};
use crate::prompts::PromptTracker;
use crate::registry::{ActivityRegistry, CompletionData, NewActivity};
use crate::store::{ActivityLogStore, ActivityLogWriter};
use crate::types::{ActivityRecord, PromptRecord};
use crate::write_queue::{WriteQueue, WriteTicket};

/// What an ingested event did to the engine state.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestEffect {
    PromptStarted {
        prompt_id: String,
        interrupted_prompt_id: Option<String>,
    },
    PromptCompleted {
        prompt_id: Option<String>,
    },
    ActivityStarted {
        record_id: String,
        correlation_id: Option<String>,
    },
    ActivityCompleted {
        record_id: String,
        strategy: MatchStrategy,
    },
    ToolAttributed {
        record_id: Option<String>,
    },
    CompletionDropped,
    GraphOnly,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub kind: EventKind,
    pub session_id: String,
    pub node_id: String,
    pub effect: IngestEffect,
}

struct EngineState {
    registry: ActivityRegistry,
    prompts: PromptTracker,
    graph: EventGraph,
}

pub struct MonitorService {
    config: MonitorConfig,
    state: Mutex<EngineState>,
    correlation: SharedCorrelationStore,
    write_queue: WriteQueue,
    notifier: Notifier,
}

impl MonitorService {
    /// Loads the persisted log under `home` and starts the write queue. Must be called
    /// from within a tokio runtime.
    pub fn start(config: MonitorConfig, home: &Path) -> Result<Arc<Self>> {
        let store = ActivityLogStore::new(config.activity_log_path(home), config.registry.capacity);
        let records = store.load()?;
        tracing::info!(
            path = %store.path().display(),
            restored = records.len(),
            "Activity log loaded"
        );
        Ok(Self::with_writer(config, records, Arc::new(store)))
    }

    /// Builds the engine over an arbitrary log writer, seeded with `records`.
    pub fn with_writer(
        config: MonitorConfig,
        records: Vec<ActivityRecord>,
        writer: Arc<dyn ActivityLogWriter>,
    ) -> Arc<Self> {
        let registry = ActivityRegistry::from_records(records, config.registry.capacity);
        let correlation = Arc::new(Mutex::new(CorrelationStore::new(config.correlation.ttl())));
        let write_queue = WriteQueue::spawn(
            writer,
            Duration::from_millis(config.write_queue.settle_delay_ms),
        );

        Arc::new(Self {
            state: Mutex::new(EngineState {
                registry,
                prompts: PromptTracker::new(),
                graph: EventGraph::new(),
            }),
            correlation,
            write_queue,
            notifier: Notifier::default(),
            config,
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Applies one normalized event. Resolves once any resulting log write is applied;
    /// a failed write is returned as an error while the in-memory change stays.
    pub async fn ingest(&self, event: NormalizedEvent) -> Result<IngestOutcome> {
        let received_at = Utc::now();
        let (outcome, ticket) = {
            let mut state = self.lock_state();
            self.apply(&mut state, &event, received_at)
        };

        if let Some(ticket) = ticket {
            ticket.wait().await?;
        }
        Ok(outcome)
    }

    /// Marks stale active records as failed. Driven by the host's reaper timer.
    pub async fn reap_stale(&self, now: DateTime<Utc>) -> Result<Vec<ActivityRecord>> {
        let stale_after = self.config.reaper.stale_after();
        let (reaped, ticket) = {
            let mut state = self.lock_state();
            let reaped = state.registry.reap_stale(now, stale_after);
            if reaped.is_empty() {
                return Ok(reaped);
            }
            for record in &reaped {
                tracing::warn!(
                    record_id = %record.id,
                    session_id = %record.session_id,
                    description = %record.description,
                    "Reaped stale activity"
                );
                self.notifier
                    .publish(MonitorUpdate::ActivityUpdated(record.clone()));
            }
            let ticket = self.persist(&state);
            (reaped, ticket)
        };

        ticket.wait().await?;
        Ok(reaped)
    }

    /// Empties the registry, the correlation store and the prompt tracker.
    pub async fn clear(&self) -> Result<usize> {
        let (removed, ticket) = {
            let mut state = self.lock_state();
            let removed = state.registry.clear();
            state.prompts.clear();
            self.lock_correlation().clear();
            self.notifier.publish(MonitorUpdate::Cleared { removed });
            (removed, self.persist(&state))
        };
        tracing::info!(removed, "Activity log cleared");

        ticket.wait().await?;
        Ok(removed)
    }

    pub fn list_activity(&self, session_id: Option<&str>, limit: usize) -> Vec<ActivityRecord> {
        self.lock_state().registry.list(session_id, limit)
    }

    pub fn list_prompts(&self) -> Vec<PromptRecord> {
        self.lock_state().prompts.list()
    }

    pub fn active_prompt_id(&self, session_id: &str) -> Option<String> {
        self.lock_state()
            .prompts
            .active_prompt_id(session_id)
            .map(str::to_string)
    }

    pub fn sessions(&self) -> Vec<SessionSummary> {
        self.lock_state().graph.sessions()
    }

    pub fn dag_snapshot(&self) -> DagSnapshot {
        self.lock_state().graph.snapshot(Utc::now())
    }

    pub fn session_dag(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.lock_state().graph.session_snapshot(session_id)
    }

    pub fn session_nodes(&self, session_id: &str) -> Option<Vec<GraphNode>> {
        self.lock_state().graph.nodes(session_id)
    }

    pub fn node(&self, session_id: &str, node_id: &str) -> Option<GraphNode> {
        self.lock_state().graph.node(session_id, node_id).cloned()
    }

    pub fn pending_correlations(&self) -> usize {
        self.lock_correlation().len()
    }

    fn apply(
        &self,
        state: &mut EngineState,
        event: &NormalizedEvent,
        received_at: DateTime<Utc>,
    ) -> (IngestOutcome, Option<WriteTicket>) {
        let session_id = event.session_id.as_str();
        let active_before = state.prompts.active_prompt_id(session_id).map(str::to_string);
        let mut submitted_prompt = None;
        let mut ticket = None;

        tracing::debug!(session_id = %session_id, kind = %event.kind, tool = ?event.tool_name, "Applying event");

        // Tool events without a tool name were classified by an explicit kind and are
        // always tracked.
        let tracked = event
            .tool_name
            .as_deref()
            .map_or(true, |tool| self.config.intake.is_tracked(tool));

        let effect = match (event.kind, event.tool_name.as_deref()) {
            (EventKind::PromptSubmit, _) => {
                let text = event.prompt.as_deref().unwrap_or_default();
                let started = state.prompts.submit(session_id, text, event.timestamp);
                if let Some(interrupted) = &started.interrupted {
                    self.notifier
                        .publish(MonitorUpdate::PromptUpdated(interrupted.clone()));
                }
                self.notifier
                    .publish(MonitorUpdate::PromptUpdated(started.prompt.clone()));
                submitted_prompt = Some(started.prompt.prompt_id.clone());
                IngestEffect::PromptStarted {
                    prompt_id: started.prompt.prompt_id,
                    interrupted_prompt_id: started.interrupted.map(|p| p.prompt_id),
                }
            }
            (EventKind::SessionStop, _) => {
                let completed = state.prompts.complete_active(session_id, event.timestamp);
                if let Some(prompt) = &completed {
                    tracing::info!(
                        session_id = %session_id,
                        prompt_id = %prompt.prompt_id,
                        duration_ms = ?prompt.duration,
                        "Prompt completed"
                    );
                    self.notifier
                        .publish(MonitorUpdate::PromptUpdated(prompt.clone()));
                }
                IngestEffect::PromptCompleted {
                    prompt_id: completed.map(|p| p.prompt_id),
                }
            }
            (EventKind::ToolBegin, Some(tool)) if !tracked => {
                let record = state.registry.attribute_tool(session_id, tool);
                if let Some(record) = &record {
                    self.notifier
                        .publish(MonitorUpdate::ActivityUpdated(record.clone()));
                    ticket = Some(self.persist(state));
                }
                IngestEffect::ToolAttributed {
                    record_id: record.map(|r| r.id),
                }
            }
            (EventKind::ToolBegin, _) => {
                let tool = declared_tool(event);
                let correlation_id = Some(self.register_correlation(event));
                let record = state.registry.begin(NewActivity {
                    session_id: session_id.to_string(),
                    parent_prompt_id: active_before.clone(),
                    correlation_id: correlation_id.clone(),
                    start_time: event.timestamp,
                    description: event
                        .description
                        .clone()
                        .unwrap_or_else(|| tool.to_string()),
                    tool_name: tool.to_string(),
                    transcript_ref: event.transcript_ref.clone(),
                });
                tracing::info!(
                    session_id = %session_id,
                    record_id = %record.id,
                    tool = %tool,
                    "Activity started"
                );
                self.notifier
                    .publish(MonitorUpdate::ActivityCreated(record.clone()));
                ticket = Some(self.persist(state));
                IngestEffect::ActivityStarted {
                    record_id: record.id,
                    correlation_id,
                }
            }
            (EventKind::ToolEnd, tool_name) if tracked => {
                let correlation_id = self
                    .lock_correlation()
                    .consume(&CorrelationKey::for_event(event), tokio::time::Instant::now());
                let probe = CompletionProbe {
                    session_id,
                    tool_name,
                    description: event.description.as_deref(),
                    correlation_id: correlation_id.as_deref(),
                    at: event.timestamp,
                };
                let data = CompletionData {
                    metrics: event.metrics,
                    output: event.output.clone(),
                    transcript_ref: event.transcript_ref.clone(),
                };
                match state
                    .registry
                    .complete(&probe, data, &self.config.matching)
                {
                    Some(outcome) => {
                        tracing::info!(
                            session_id = %session_id,
                            record_id = %outcome.record.id,
                            strategy = outcome.strategy.as_str(),
                            subagent = event.is_subagent_completion(),
                            "Activity completed"
                        );
                        self.notifier
                            .publish(MonitorUpdate::ActivityUpdated(outcome.record.clone()));
                        ticket = Some(self.persist(state));
                        IngestEffect::ActivityCompleted {
                            record_id: outcome.record.id,
                            strategy: outcome.strategy,
                        }
                    }
                    None => {
                        tracing::info!(
                            session_id = %session_id,
                            tool = ?tool_name,
                            description = ?event.description,
                            "No active record matched completion; dropping"
                        );
                        IngestEffect::CompletionDropped
                    }
                }
            }
            (EventKind::Unknown, _) => {
                tracing::info!(
                    session_id = %session_id,
                    hook = ?event.hook_name,
                    tool = ?event.tool_name,
                    "Unrecognized event recorded in graph only"
                );
                IngestEffect::GraphOnly
            }
            _ => IngestEffect::GraphOnly,
        };

        let node = state.graph.record_event(
            event,
            active_before.as_deref(),
            submitted_prompt.as_deref(),
            received_at,
        );

        let outcome = IngestOutcome {
            kind: event.kind,
            session_id: session_id.to_string(),
            node_id: node.id,
            effect,
        };
        (outcome, ticket)
    }

    fn register_correlation(&self, event: &NormalizedEvent) -> String {
        let key = CorrelationKey::for_event(event);
        let correlation_id = self
            .lock_correlation()
            .register(key.clone(), tokio::time::Instant::now());
        schedule_expiry(&self.correlation, key, correlation_id.clone());
        correlation_id
    }

    fn persist(&self, state: &EngineState) -> WriteTicket {
        self.write_queue.enqueue(state.registry.records().to_vec())
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_correlation(&self) -> MutexGuard<'_, CorrelationStore> {
        self.correlation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
