//! HTTP surface of the daemon.
//!
//! Intake endpoints accept one hook payload per request and answer once the event has
//! been applied (and persisted, when it changed the activity log). Everything else is
//! a read-only view over the engine, plus `POST /clear` and the SSE update stream.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use agent_monitor_protocol::{normalize_event, parse_payload, Ack, ErrorInfo, Health, MAX_REQUEST_BYTES};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Query, Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use monitor_core::{MonitorError, MonitorService};
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

const DEFAULT_LIST_LIMIT: usize = 50;
const SSE_KEEP_ALIVE_SECS: u64 = 15;

#[derive(Clone)]
pub struct AppState {
    service: Arc<MonitorService>,
    port: u16,
}

impl AppState {
    pub fn new(service: Arc<MonitorService>, port: u16) -> Self {
        Self { service, port }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhook", post(intake))
        .route("/subagent-event", post(intake))
        .route("/tool-event", post(intake))
        .route("/stop-event", post(intake))
        .route("/prompt-event", post(intake))
        .route("/health", get(health))
        .route("/test", post(test_ack))
        .route("/clear", post(clear))
        .route("/subagents", get(list_subagents))
        .route("/prompts", get(list_prompts))
        .route("/dag", get(dag))
        .route("/dag/{session_id}", get(session_dag))
        .route("/dag/{session_id}/nodes/{node_id}", get(dag_node))
        .route("/stream", get(stream))
        .layer(middleware::from_fn(acknowledge_options))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

/// Answers any `OPTIONS` request that is not a full CORS preflight.
async fn acknowledge_options(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    next.run(request).await
}

async fn intake(State(state): State<AppState>, body: Bytes) -> Response {
    let event = match parse_payload(&body).and_then(|payload| {
        normalize_event(payload, &state.service.config().intake.options(), Utc::now())
    }) {
        Ok(event) => event,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Rejected hook payload");
            return bad_request(err);
        }
    };

    debug!(session_id = %event.session_id, kind = %event.kind, "Hook event received");
    match state.service.ingest(event).await {
        Ok(_) => Json(Ack::ok()).into_response(),
        Err(err) => internal_error(err),
    }
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "healthy".to_string(),
        timestamp: Utc::now().to_rfc3339(),
        port: state.port,
    })
}

async fn test_ack() -> Json<Ack> {
    Json(Ack::with_message("Agent monitor is receiving events"))
}

async fn clear(State(state): State<AppState>) -> Response {
    match state.service.clear().await {
        Ok(removed) => Json(Ack::with_message(format!("Cleared {} records", removed))).into_response(),
        Err(err) => internal_error(err),
    }
}

#[derive(Debug, Deserialize)]
struct ActivityQuery {
    session_id: Option<String>,
    limit: Option<usize>,
}

async fn list_subagents(
    State(state): State<AppState>,
    Query(query): Query<ActivityQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).max(1);
    let records = state
        .service
        .list_activity(query.session_id.as_deref(), limit);
    Json(records).into_response()
}

async fn list_prompts(State(state): State<AppState>) -> Response {
    Json(state.service.list_prompts()).into_response()
}

async fn dag(State(state): State<AppState>) -> Response {
    Json(state.service.dag_snapshot()).into_response()
}

async fn session_dag(State(state): State<AppState>, Path(session_id): Path<String>) -> Response {
    match state.service.session_dag(&session_id) {
        Some(snapshot) => Json(snapshot).into_response(),
        None => not_found(format!("unknown session {}", session_id)),
    }
}

async fn dag_node(
    State(state): State<AppState>,
    Path((session_id, node_id)): Path<(String, String)>,
) -> Response {
    match state.service.node(&session_id, &node_id) {
        Some(node) => Json(node).into_response(),
        None => not_found(format!("unknown node {} in session {}", node_id, session_id)),
    }
}

async fn stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.service.notifier().subscribe();
    let updates = BroadcastStream::new(rx)
        .filter_map(|update| update.ok())
        .map(|update| {
            let data = serde_json::to_string(&update).unwrap_or_else(|_| "{}".to_string());
            Ok::<Event, Infallible>(Event::default().event(update.event_name()).data(data))
        });
    let connected = tokio_stream::once(Ok::<Event, Infallible>(
        Event::default().event("connected").data("{}"),
    ));

    Sse::new(connected.chain(updates))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(SSE_KEEP_ALIVE_SECS)))
}

fn bad_request(err: ErrorInfo) -> Response {
    (StatusCode::BAD_REQUEST, Json(Ack::error(err))).into_response()
}

fn not_found(message: String) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(Ack::error(ErrorInfo::new("not_found", message))),
    )
        .into_response()
}

fn internal_error(err: MonitorError) -> Response {
    error!(error = %err, "Request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(Ack::error(ErrorInfo::new("internal_error", err.to_string()))),
    )
        .into_response()
}
