//! Hook payload schema and event classification for the agent monitor.
//!
//! This crate is shared by the daemon and the hook forwarder to prevent schema drift.
//! Upstream hook payloads are loosely typed (field names differ between tool versions
//! and wrappers), so normalization works on raw JSON and looks each field up under all
//! of its known spellings. The daemon remains the authority on classification.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB
pub const DEFAULT_DELEGATION_TOOL: &str = "Task";
/// Session id used when a payload carries none.
pub const UNKNOWN_SESSION: &str = "unknown";

const DESCRIPTION_MAX_CHARS: usize = 120;

const SESSION_KEYS: &[&str] = &["session_id", "sessionId", "session"];
const KIND_KEYS: &[&str] = &["kind", "event_kind", "eventKind", "type"];
const HOOK_KEYS: &[&str] = &[
    "hook_event_name",
    "hookEventName",
    "hook_event",
    "hookEvent",
    "event",
];
const TOOL_KEYS: &[&str] = &["tool_name", "toolName", "tool"];
const TOOL_INPUT_KEYS: &[&str] = &["tool_input", "toolInput", "input"];
const TOOL_RESPONSE_KEYS: &[&str] = &[
    "tool_response",
    "toolResponse",
    "tool_output",
    "toolOutput",
];
const TRANSCRIPT_KEYS: &[&str] = &[
    "transcript_path",
    "transcriptPath",
    "agent_transcript_path",
    "transcript",
];
const PROMPT_KEYS: &[&str] = &["prompt", "user_prompt", "userPrompt"];
const TIMESTAMP_KEYS: &[&str] = &["timestamp", "recorded_at", "recordedAt", "time"];

/// Closed set of event kinds the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    PromptSubmit,
    ToolBegin,
    ToolEnd,
    SessionStop,
    SubagentStop,
    Notification,
    PreCompact,
    Unknown,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PromptSubmit => "prompt_submit",
            EventKind::ToolBegin => "tool_begin",
            EventKind::ToolEnd => "tool_end",
            EventKind::SessionStop => "session_stop",
            EventKind::SubagentStop => "subagent_stop",
            EventKind::Notification => "notification",
            EventKind::PreCompact => "pre_compact",
            EventKind::Unknown => "unknown",
        }
    }

    /// Parses an explicit kind name. Accepts PascalCase, snake_case and kebab-case.
    pub fn parse(value: &str) -> Option<Self> {
        let folded: String = value
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        match folded.as_str() {
            "promptsubmit" => Some(EventKind::PromptSubmit),
            "toolbegin" => Some(EventKind::ToolBegin),
            "toolend" => Some(EventKind::ToolEnd),
            "sessionstop" => Some(EventKind::SessionStop),
            "subagentstop" => Some(EventKind::SubagentStop),
            "notification" => Some(EventKind::Notification),
            "precompact" => Some(EventKind::PreCompact),
            "unknown" => Some(EventKind::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Counters reported by a completed tool invocation. `None` means "not reported".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    #[serde(default)]
    pub tokens: Option<u64>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub tool_use_count: Option<u64>,
}

impl Metrics {
    /// Field-wise merge: values present on `newer` win, otherwise `self` is kept.
    pub fn merged_with(self, newer: Metrics) -> Metrics {
        Metrics {
            tokens: newer.tokens.or(self.tokens),
            duration_ms: newer.duration_ms.or(self.duration_ms),
            tool_use_count: newer.tool_use_count.or(self.tool_use_count),
        }
    }
}

/// One upstream event after field normalization and classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEvent {
    pub session_id: String,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub hook_name: Option<String>,
    pub tool_name: Option<String>,
    pub description: Option<String>,
    pub prompt: Option<String>,
    /// True when the tool is the delegation tool (the tool that spawns subagents).
    pub delegation: bool,
    pub metrics: Metrics,
    pub output: Option<String>,
    pub transcript_ref: Option<String>,
    pub raw_payload: Value,
}

impl NormalizedEvent {
    /// A `ToolEnd` for the delegation tool doubles as a subagent-completion signal.
    pub fn is_subagent_completion(&self) -> bool {
        self.kind == EventKind::ToolEnd && self.delegation
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntakeOptions {
    pub delegation_tool: String,
}

impl Default for IntakeOptions {
    fn default() -> Self {
        Self {
            delegation_tool: DEFAULT_DELEGATION_TOOL.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Body returned by the intake endpoints.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Ack {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
            error: None,
        }
    }

    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn error(error: ErrorInfo) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Health {
    pub status: String,
    pub timestamp: String,
    pub port: u16,
}

/// Parses a request body into a JSON object.
pub fn parse_payload(body: &[u8]) -> Result<Value, ErrorInfo> {
    if body.len() > MAX_REQUEST_BYTES {
        return Err(ErrorInfo::new(
            "request_too_large",
            "request exceeded maximum size",
        ));
    }
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }
    let value: Value = serde_json::from_slice(body).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })?;
    if !value.is_object() {
        return Err(ErrorInfo::new(
            "invalid_payload",
            "event payload must be a JSON object",
        ));
    }
    Ok(value)
}

/// Normalizes one upstream payload. `received_at` is used when the payload has no
/// usable timestamp of its own.
pub fn normalize_event(
    payload: Value,
    options: &IntakeOptions,
    received_at: DateTime<Utc>,
) -> Result<NormalizedEvent, ErrorInfo> {
    let object = payload.as_object().ok_or_else(|| {
        ErrorInfo::new("invalid_payload", "event payload must be a JSON object")
    })?;

    let session_id = string_field(object, SESSION_KEYS).unwrap_or_else(|| UNKNOWN_SESSION.to_string());
    let explicit_kind = string_field(object, KIND_KEYS);
    let hook_name = string_field(object, HOOK_KEYS);
    let tool_name = string_field(object, TOOL_KEYS);
    let kind = classify(
        explicit_kind.as_deref(),
        hook_name.as_deref(),
        tool_name.as_deref(),
    );

    let tool_input = lookup(object, TOOL_INPUT_KEYS).and_then(Value::as_object);
    let tool_response = lookup(object, TOOL_RESPONSE_KEYS);
    let prompt = string_field(object, PROMPT_KEYS)
        .or_else(|| match kind {
            EventKind::PromptSubmit => tool_input.and_then(|input| string_field(input, &["prompt"])),
            _ => None,
        });
    let description = string_field(object, &["description"]).or_else(|| {
        tool_input.and_then(|input| describe_tool_input(input, tool_name.as_deref()))
    });
    let delegation = tool_name
        .as_deref()
        .map(|tool| tool == options.delegation_tool)
        .unwrap_or(false);
    let timestamp = lookup(object, TIMESTAMP_KEYS)
        .and_then(parse_timestamp)
        .unwrap_or(received_at);

    Ok(NormalizedEvent {
        session_id,
        kind,
        timestamp,
        hook_name,
        tool_name,
        description,
        prompt,
        delegation,
        metrics: tool_response.map(extract_metrics).unwrap_or_default(),
        output: tool_response.and_then(extract_output),
        transcript_ref: string_field(object, TRANSCRIPT_KEYS),
        raw_payload: payload,
    })
}

/// Kind resolution in priority order: explicit kind, hook name, hook name + tool name.
pub fn classify(
    explicit_kind: Option<&str>,
    hook_name: Option<&str>,
    tool_name: Option<&str>,
) -> EventKind {
    if let Some(kind) = explicit_kind.and_then(EventKind::parse) {
        return kind;
    }

    let Some(hook) = hook_name else {
        return EventKind::Unknown;
    };

    match hook {
        "UserPromptSubmit" => EventKind::PromptSubmit,
        "Stop" | "SessionEnd" => EventKind::SessionStop,
        "SubagentStop" => EventKind::SubagentStop,
        "Notification" => EventKind::Notification,
        "PreCompact" => EventKind::PreCompact,
        "PreToolUse" if tool_name.is_some() => EventKind::ToolBegin,
        "PostToolUse" if tool_name.is_some() => EventKind::ToolEnd,
        _ => EventKind::Unknown,
    }
}

fn lookup<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find(|value| !value.is_null())
}

fn string_field(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .filter_map(|value| match value {
            Value::String(text) => Some(text.trim().to_string()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        })
        .find(|text| !text.is_empty())
}

fn describe_tool_input(input: &Map<String, Value>, tool_name: Option<&str>) -> Option<String> {
    if let Some(description) = string_field(input, &["description"]) {
        return Some(description);
    }
    if let Some(prompt) = string_field(input, &["prompt"]) {
        return Some(truncate_line(&prompt));
    }
    string_field(input, &["command", "file_path", "pattern"])
        .map(|value| truncate_line(&value))
        .or_else(|| tool_name.map(str::to_string))
}

fn truncate_line(value: &str) -> String {
    let first_line = value.lines().next().unwrap_or_default().trim();
    first_line.chars().take(DESCRIPTION_MAX_CHARS).collect()
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => DateTime::parse_from_rfc3339(text.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(number) => {
            let raw = number.as_i64()?;
            // Values below 1e12 are epoch seconds, above are epoch milliseconds.
            if raw.abs() < 1_000_000_000_000 {
                Utc.timestamp_opt(raw, 0).single()
            } else {
                Utc.timestamp_millis_opt(raw).single()
            }
        }
        _ => None,
    }
}

fn extract_metrics(response: &Value) -> Metrics {
    let Some(object) = response.as_object() else {
        return Metrics::default();
    };

    let tokens = u64_field(object, &["totalTokens", "total_tokens", "tokens"]).or_else(|| {
        let usage = object.get("usage")?.as_object()?;
        let input = u64_field(usage, &["input_tokens", "inputTokens"]).unwrap_or(0);
        let output = u64_field(usage, &["output_tokens", "outputTokens"]).unwrap_or(0);
        let total = input.saturating_add(output);
        (total > 0).then_some(total)
    });

    Metrics {
        tokens,
        duration_ms: u64_field(
            object,
            &["totalDurationMs", "total_duration_ms", "duration_ms", "durationMs"],
        ),
        tool_use_count: u64_field(
            object,
            &["totalToolUseCount", "total_tool_use_count", "tool_use_count", "toolUseCount"],
        ),
    }
}

fn u64_field(object: &Map<String, Value>, keys: &[&str]) -> Option<u64> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find_map(|value| value.as_u64().or_else(|| value.as_f64().map(|v| v.max(0.0) as u64)))
}

fn extract_output(response: &Value) -> Option<String> {
    match response {
        Value::String(text) => non_empty(text),
        Value::Array(blocks) => join_text_blocks(blocks),
        Value::Object(object) => match object.get("content") {
            Some(Value::String(text)) => non_empty(text),
            Some(Value::Array(blocks)) => join_text_blocks(blocks),
            _ => string_field(object, &["result", "output", "stdout"]),
        },
        _ => None,
    }
}

fn join_text_blocks(blocks: &[Value]) -> Option<String> {
    let text = blocks
        .iter()
        .filter_map(|block| match block {
            Value::String(text) => Some(text.as_str()),
            Value::Object(object) => object.get("text").and_then(Value::as_str),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");
    non_empty(&text)
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
