//! HTTP handlers — the v1 mutation and query surface.
//!
//! Bodies are decoded by hand so a malformed payload is rejected at the
//! boundary with the same `{status, error, data}` envelope the read
//! paths use. `data` is always an array, never null.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use meshmap_core::{Exception, ExceptionFilter, NetRecord, RecordFilter};
use meshmap_services::{HistoryStore, Node, PeerErrors, PeerStatus};

use crate::notifier::Notifier;

#[derive(Clone)]
pub struct ApiState {
    pub node: Node,
    pub history: HistoryStore,
    pub notifier: Notifier,
}

// ── Response envelope ─────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct Resp {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub data: Vec<Value>,
}

impl Resp {
    pub fn success(data: Vec<Value>) -> Self {
        Self {
            status: "success".into(),
            error: None,
            data,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            error: Some(msg.into()),
            data: Vec::new(),
        }
    }
}

// ── Inbound payload shapes ────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct RecordBatch {
    #[serde(default)]
    pub data: Vec<NetRecord>,
}

#[derive(Deserialize)]
pub struct ExceptionBatch {
    #[serde(default)]
    pub data: Vec<Exception>,
}

// ── Shared helpers ────────────────────────────────────────────────────────────

type Reject = (StatusCode, Json<Resp>);

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, Reject> {
    serde_json::from_str(body)
        .map_err(|e| (StatusCode::BAD_REQUEST, Json(Resp::error(e.to_string()))))
}

/// Sender identity for ingest logs, from proxy headers when present.
fn read_sender(headers: &HeaderMap) -> String {
    for key in ["x-real-ip", "x-forwarded-for"] {
        if let Some(v) = headers.get(key).and_then(|v| v.to_str().ok()) {
            if !v.is_empty() {
                return v.to_string();
            }
        }
    }
    "unknown".to_string()
}

/// One aggregate outcome for an await-all round: any peer failure makes
/// the whole operation a failure, even though the local write already
/// happened. The first (deterministic) entry is surfaced.
fn aggregate_outcome(errors: PeerErrors) -> (StatusCode, Json<Resp>) {
    match errors.first() {
        Some((peer, msg)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(Resp::error(format!("{msg} - {peer}"))),
        ),
        None => (StatusCode::OK, Json(Resp::success(Vec::new()))),
    }
}

fn to_values<T: Serialize>(items: Vec<T>) -> Vec<Value> {
    items
        .into_iter()
        .filter_map(|item| serde_json::to_value(item).ok())
        .collect()
}

// ── Telemetry ingest: /netstat, /status (POST), /tracert ─────────────────────

pub async fn handle_netstat(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode, Reject> {
    let batch: RecordBatch = decode(&body)?;
    state.node.apply_netstat(batch.data, &read_sender(&headers));
    Ok(StatusCode::NO_CONTENT)
}

pub async fn handle_status_update(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode, Reject> {
    let batch: RecordBatch = decode(&body)?;
    state.node.apply_status(batch.data, &read_sender(&headers));
    Ok(StatusCode::NO_CONTENT)
}

pub async fn handle_tracert(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode, Reject> {
    let batch: RecordBatch = decode(&body)?;
    state.node.apply_tracert(batch.data, &read_sender(&headers));
    Ok(StatusCode::NO_CONTENT)
}

// ── /records ──────────────────────────────────────────────────────────────────

pub async fn handle_records_get(
    State(state): State<ApiState>,
    Query(filter): Query<RecordFilter>,
) -> Result<Json<Resp>, Reject> {
    let history = state.history.clone();
    match tokio::task::spawn_blocking(move || history.load_records(&filter)).await {
        Ok(Ok(records)) => Ok(Json(Resp::success(to_values(records)))),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "history query failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(Resp::error(e.to_string())),
            ))
        }
        Err(e) => {
            tracing::error!(error = %e, "history query task failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(Resp::error(e.to_string())),
            ))
        }
    }
}

pub async fn handle_records_post(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: String,
) -> Result<(StatusCode, Json<Resp>), Reject> {
    let batch: RecordBatch = decode(&body)?;
    let errors = state
        .node
        .apply_records(batch.data, &read_sender(&headers))
        .await;
    Ok(aggregate_outcome(errors))
}

pub async fn handle_records_delete(
    State(state): State<ApiState>,
    body: String,
) -> Result<(StatusCode, Json<Resp>), Reject> {
    let ids: Vec<String> = decode(&body)?;
    let errors = state.node.delete_records(ids).await;
    Ok(aggregate_outcome(errors))
}

// ── /exceptions ───────────────────────────────────────────────────────────────

pub async fn handle_exceptions_get(
    State(state): State<ApiState>,
    Query(filter): Query<ExceptionFilter>,
) -> Json<Resp> {
    let items = state.node.fetch_exceptions(&filter).await;
    Json(Resp::success(to_values(items)))
}

pub async fn handle_exceptions_post(
    State(state): State<ApiState>,
    body: String,
) -> Result<StatusCode, Reject> {
    let batch: ExceptionBatch = decode(&body)?;
    state.node.apply_exceptions(batch.data);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn handle_exceptions_delete(
    State(state): State<ApiState>,
    body: String,
) -> Result<(StatusCode, Json<Resp>), Reject> {
    let ids: Vec<String> = decode(&body)?;
    let errors = state.node.delete_exceptions(ids).await;
    Ok(aggregate_outcome(errors))
}

// ── /status (GET) — node state for operators and meshmap-ctl ─────────────────

#[derive(Serialize)]
pub struct NodeStatus {
    pub records: usize,
    pub exceptions: usize,
    pub peers: Vec<PeerStatus>,
}

pub async fn handle_node_status(State(state): State<ApiState>) -> Json<NodeStatus> {
    Json(NodeStatus {
        records: state.node.records.len(),
        exceptions: state.node.exceptions.len(),
        peers: state.node.peers.status(),
    })
}

// ── /webhook — relay to the configured notifier endpoints ────────────────────

pub async fn handle_webhook(State(state): State<ApiState>, body: String) -> StatusCode {
    if state.notifier.is_enabled() {
        state.notifier.relay(body);
    }
    StatusCode::NO_CONTENT
}
