//! Per-session event graph for diagnostics.
//!
//! Every normalized event becomes a node. A session's first node is a synthetic root,
//! created the first time the session id is seen. Nodes are append-only and are never
//! reparented. The graph is read by introspection queries only; it plays no part in
//! matching.
//!
//! Parent selection for a new node:
//! - the active prompt's node, unless the event is itself a prompt submission;
//! - otherwise the most recently added prompt-submission node of the session;
//! - otherwise the session root.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use agent_monitor_protocol::{EventKind, NormalizedEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::types::new_id;

pub const ROOT_KIND: &str = "session_root";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,
    pub session_id: String,
    pub kind: String,
    pub received_at: DateTime<Utc>,
    pub parent_id: Option<String>,
    pub child_ids: Vec<String>,
    pub payload: Value,
}

#[derive(Debug)]
struct SessionGraph {
    root_id: String,
    created_at: DateTime<Utc>,
    nodes: HashMap<String, GraphNode>,
    order: Vec<String>,
    prompt_nodes: HashMap<String, String>,
    last_prompt_node: Option<String>,
}

impl SessionGraph {
    fn new(session_id: &str, at: DateTime<Utc>) -> Self {
        let root = GraphNode {
            id: new_id(),
            session_id: session_id.to_string(),
            kind: ROOT_KIND.to_string(),
            received_at: at,
            parent_id: None,
            child_ids: Vec::new(),
            payload: Value::Null,
        };
        let root_id = root.id.clone();
        Self {
            root_id: root_id.clone(),
            created_at: at,
            nodes: HashMap::from([(root_id.clone(), root)]),
            order: vec![root_id],
            prompt_nodes: HashMap::new(),
            last_prompt_node: None,
        }
    }

    fn parent_for(&self, kind: EventKind, active_prompt_id: Option<&str>) -> String {
        if kind != EventKind::PromptSubmit {
            if let Some(node_id) = active_prompt_id.and_then(|id| self.prompt_nodes.get(id)) {
                return node_id.clone();
            }
        }
        self.last_prompt_node
            .clone()
            .unwrap_or_else(|| self.root_id.clone())
    }

    fn append(&mut self, node: GraphNode) {
        if let Some(parent) = node
            .parent_id
            .as_ref()
            .and_then(|parent_id| self.nodes.get_mut(parent_id))
        {
            parent.child_ids.push(node.id.clone());
        }
        self.order.push(node.id.clone());
        self.nodes.insert(node.id.clone(), node);
    }

    fn ordered_nodes(&self) -> Vec<GraphNode> {
        self.order
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub root_id: String,
    pub node_count: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    #[serde(flatten)]
    pub summary: SessionSummary,
    pub nodes: Vec<GraphNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DagSnapshot {
    pub generated_at: DateTime<Utc>,
    pub session_count: usize,
    pub total_nodes: usize,
    pub sessions: Vec<SessionSnapshot>,
}

#[derive(Debug, Default)]
pub struct EventGraph {
    sessions: HashMap<String, SessionGraph>,
    session_order: Vec<String>,
}

impl EventGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a node for `event`. `active_prompt_id` is the session's active prompt
    /// before this event was applied; `submitted_prompt_id` is the prompt this event
    /// opened, if it is a prompt submission.
    pub fn record_event(
        &mut self,
        event: &NormalizedEvent,
        active_prompt_id: Option<&str>,
        submitted_prompt_id: Option<&str>,
        received_at: DateTime<Utc>,
    ) -> GraphNode {
        let session = match self.sessions.entry(event.session_id.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                self.session_order.push(event.session_id.clone());
                tracing::debug!(session_id = %event.session_id, "Session graph created");
                entry.insert(SessionGraph::new(&event.session_id, received_at))
            }
        };

        let parent_id = session.parent_for(event.kind, active_prompt_id);
        let node = GraphNode {
            id: new_id(),
            session_id: event.session_id.clone(),
            kind: event.kind.as_str().to_string(),
            received_at,
            parent_id: Some(parent_id),
            child_ids: Vec::new(),
            payload: event.raw_payload.clone(),
        };

        if event.kind == EventKind::PromptSubmit {
            if let Some(prompt_id) = submitted_prompt_id {
                session
                    .prompt_nodes
                    .insert(prompt_id.to_string(), node.id.clone());
            }
            session.last_prompt_node = Some(node.id.clone());
        }

        session.append(node.clone());
        node
    }

    pub fn sessions(&self) -> Vec<SessionSummary> {
        self.session_order
            .iter()
            .filter_map(|id| self.summary(id))
            .collect()
    }

    pub fn nodes(&self, session_id: &str) -> Option<Vec<GraphNode>> {
        self.sessions.get(session_id).map(SessionGraph::ordered_nodes)
    }

    pub fn node(&self, session_id: &str, node_id: &str) -> Option<&GraphNode> {
        self.sessions.get(session_id)?.nodes.get(node_id)
    }

    pub fn session_snapshot(&self, session_id: &str) -> Option<SessionSnapshot> {
        let graph = self.sessions.get(session_id)?;
        Some(SessionSnapshot {
            summary: self.summary(session_id)?,
            nodes: graph.ordered_nodes(),
        })
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> DagSnapshot {
        let sessions: Vec<_> = self
            .session_order
            .iter()
            .filter_map(|id| self.session_snapshot(id))
            .collect();
        DagSnapshot {
            generated_at: now,
            session_count: sessions.len(),
            total_nodes: sessions.iter().map(|s| s.summary.node_count).sum(),
            sessions,
        }
    }

    fn summary(&self, session_id: &str) -> Option<SessionSummary> {
        let graph = self.sessions.get(session_id)?;
        Some(SessionSummary {
            session_id: session_id.to_string(),
            root_id: graph.root_id.clone(),
            node_count: graph.nodes.len(),
            created_at: graph.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_monitor_protocol::Metrics;
    use serde_json::json;

    fn at() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-31T00:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    fn event(session: &str, kind: EventKind) -> NormalizedEvent {
        NormalizedEvent {
            session_id: session.to_string(),
            kind,
            timestamp: at(),
            hook_name: None,
            tool_name: None,
            description: None,
            prompt: None,
            delegation: false,
            metrics: Metrics::default(),
            output: None,
            transcript_ref: None,
            raw_payload: json!({"session_id": session}),
        }
    }

    #[test]
    fn first_event_creates_root_and_attaches_to_it() {
        let mut graph = EventGraph::new();
        let node = graph.record_event(&event("s1", EventKind::Notification), None, None, at());

        let sessions = graph.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].node_count, 2);
        assert_eq!(node.parent_id.as_deref(), Some(sessions[0].root_id.as_str()));

        let root = graph.node("s1", &sessions[0].root_id).expect("root");
        assert_eq!(root.kind, ROOT_KIND);
        assert_eq!(root.child_ids, vec![node.id.clone()]);
    }

    #[test]
    fn events_attach_to_active_prompt_node() {
        let mut graph = EventGraph::new();
        let prompt = graph.record_event(&event("s1", EventKind::PromptSubmit), None, Some("p1"), at());
        let tool = graph.record_event(&event("s1", EventKind::ToolBegin), Some("p1"), None, at());

        assert_eq!(tool.parent_id.as_deref(), Some(prompt.id.as_str()));
    }

    #[test]
    fn prompt_submissions_chain_to_previous_prompt() {
        let mut graph = EventGraph::new();
        let first = graph.record_event(&event("s1", EventKind::PromptSubmit), None, Some("p1"), at());
        let second =
            graph.record_event(&event("s1", EventKind::PromptSubmit), Some("p1"), Some("p2"), at());

        assert_eq!(second.parent_id.as_deref(), Some(first.id.as_str()));
    }

    #[test]
    fn without_active_prompt_events_attach_to_latest_prompt_node() {
        let mut graph = EventGraph::new();
        let prompt = graph.record_event(&event("s1", EventKind::PromptSubmit), None, Some("p1"), at());
        graph.record_event(&event("s1", EventKind::SessionStop), Some("p1"), None, at());
        let late = graph.record_event(&event("s1", EventKind::ToolEnd), None, None, at());

        assert_eq!(late.parent_id.as_deref(), Some(prompt.id.as_str()));
    }

    #[test]
    fn sessions_do_not_share_nodes() {
        let mut graph = EventGraph::new();
        graph.record_event(&event("a", EventKind::PromptSubmit), None, Some("pa"), at());
        let b = graph.record_event(&event("b", EventKind::ToolBegin), Some("pa"), None, at());

        let b_root = graph
            .sessions()
            .into_iter()
            .find(|s| s.session_id == "b")
            .expect("session b")
            .root_id;
        assert_eq!(b.parent_id, Some(b_root));
        assert!(graph.node("a", &b.id).is_none());
    }

    #[test]
    fn snapshot_counts_nodes_per_session() {
        let mut graph = EventGraph::new();
        graph.record_event(&event("a", EventKind::PromptSubmit), None, Some("p"), at());
        graph.record_event(&event("a", EventKind::ToolBegin), Some("p"), None, at());
        graph.record_event(&event("b", EventKind::Unknown), None, None, at());

        let snapshot = graph.snapshot(at());
        assert_eq!(snapshot.session_count, 2);
        assert_eq!(snapshot.total_nodes, 5);
        assert_eq!(snapshot.sessions[0].summary.node_count, 3);
        assert_eq!(snapshot.sessions[0].nodes[0].kind, ROOT_KIND);
    }
}
