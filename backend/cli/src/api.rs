use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use docpipe_core::{InputId, InstanceStatus, PipelineError};
use docpipe_executor::WorkflowRuntime;
use docpipe_supervisor::HistoryStore;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

/// Shared application state for API handlers.
pub struct AppState {
    pub runtime: Arc<WorkflowRuntime>,
    pub history: Arc<HistoryStore>,
}

type ApiResult = Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)>;

/// Build the Axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/instances", get(list_instances).post(start_instance))
        .route("/api/instances/:id", get(get_instance))
        .with_state(state)
}

fn failure(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": message.into() })))
}

fn internal(context: &str, e: PipelineError) -> (StatusCode, Json<Value>) {
    tracing::error!(error = %e, "{context}");
    failure(StatusCode::INTERNAL_SERVER_ERROR, context)
}

/// Health check endpoint with instance counts per status.
async fn health(State(state): State<Arc<AppState>>) -> ApiResult {
    let counts = state
        .history
        .counts()
        .map_err(|e| internal("Failed to count instances", e))?;
    let instances: serde_json::Map<String, Value> = [
        InstanceStatus::Running,
        InstanceStatus::Completed,
        InstanceStatus::Failed,
    ]
    .into_iter()
    .map(|status| {
        let count = counts.get(&status).copied().unwrap_or(0);
        (status.as_str().to_string(), json!(count))
    })
    .collect();

    Ok((
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "docpipe",
            "version": env!("CARGO_PKG_VERSION"),
            "instances": instances,
        })),
    ))
}

#[derive(Debug, Deserialize)]
struct StartRequest {
    input_id: String,
    event_key: Option<String>,
}

/// Start an instance for an uploaded document. Accepts a bare blob name or
/// a `container/name` path.
async fn start_instance(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartRequest>,
) -> ApiResult {
    let input_id = InputId::from_blob_path(&request.input_id)
        .map_err(|e| failure(StatusCode::BAD_REQUEST, e.to_string()))?;
    let outcome = state
        .runtime
        .start_new(input_id, request.event_key.as_deref())
        .map_err(|e| internal("Failed to start instance", e))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "id": outcome.instance.id,
            "status": outcome.instance.status,
            "created": outcome.created,
        })),
    ))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
    limit: Option<usize>,
}

/// Recent instances, newest first.
async fn list_instances(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<InstanceStatus>)
        .transpose()
        .map_err(|e| failure(StatusCode::BAD_REQUEST, e.to_string()))?;
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);

    let instances = state
        .history
        .list_instances(status, limit)
        .map_err(|e| internal("Failed to list instances", e))?;
    Ok((StatusCode::OK, Json(json!({ "instances": instances }))))
}

/// One instance with its step history.
async fn get_instance(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult {
    let instance = state
        .history
        .get_instance(&id)
        .map_err(|e| internal("Failed to fetch instance", e))?
        .ok_or_else(|| failure(StatusCode::NOT_FOUND, format!("no instance {id}")))?;
    let steps = state
        .history
        .step_history(&id)
        .map_err(|e| internal("Failed to fetch step history", e))?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "instance": instance,
            "active": state.runtime.is_active(&id),
            "steps": steps,
        })),
    ))
}
