use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use common::{
    EnqueueRequest, EnqueueResponse, JobRecord, TaskAssignmentRequest, TaskAssignmentResponse,
    TaskCompleteRequest, TaskCompleteResponse, TaskProgressRequest, WorkerHeartbeatRequest,
    WorkerHeartbeatResponse, WorkerRegisterRequest, WorkerRegisterResponse, WorkerStats,
};
use tower_http::trace::TraceLayer;

use crate::error::BrokerError;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/jobs", post(enqueue_job))
        .route("/api/v1/jobs/:id", get(get_job))
        .route("/api/v1/workers/stats", get(worker_stats))
        .route("/api/v1/workers/register", post(register_worker))
        .route("/api/v1/workers/heartbeat", post(worker_heartbeat))
        .route("/api/v1/tasks/next", post(assign_task))
        .route("/api/v1/tasks/progress", post(task_progress))
        .route("/api/v1/tasks/complete", post(complete_task))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

async fn enqueue_job(
    State(state): State<AppState>,
    Json(req): Json<EnqueueRequest>,
) -> Result<Json<EnqueueResponse>, StatusCode> {
    if req.task.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let id = state.enqueue(&req.task, req.args);
    Ok(Json(EnqueueResponse { id }))
}

// Estado + resultado de un job; 404 si no existe o ya expiró
async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobRecord>, StatusCode> {
    state.job(&id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

// Plano de control: workers vivos
async fn worker_stats(State(state): State<AppState>) -> Json<Vec<WorkerStats>> {
    Json(state.worker_stats())
}

async fn register_worker(
    State(state): State<AppState>,
    Json(req): Json<WorkerRegisterRequest>,
) -> Json<WorkerRegisterResponse> {
    let worker_id = state.register_worker(req.hostname, req.max_concurrency);
    Json(WorkerRegisterResponse { worker_id })
}

async fn worker_heartbeat(
    State(state): State<AppState>,
    Json(req): Json<WorkerHeartbeatRequest>,
) -> Result<Json<WorkerHeartbeatResponse>, BrokerError> {
    state.heartbeat(&req.worker_id, req.cpu_percent, req.mem_bytes)?;
    Ok(Json(WorkerHeartbeatResponse { ok: true }))
}

async fn assign_task(
    State(state): State<AppState>,
    Json(req): Json<TaskAssignmentRequest>,
) -> Result<Json<TaskAssignmentResponse>, BrokerError> {
    let task = state.assign_next(&req.worker_id)?;
    Ok(Json(TaskAssignmentResponse { task }))
}

async fn task_progress(
    State(state): State<AppState>,
    Json(req): Json<TaskProgressRequest>,
) -> Result<Json<TaskCompleteResponse>, BrokerError> {
    state.record_progress(req)?;
    Ok(Json(TaskCompleteResponse { ok: true }))
}

async fn complete_task(
    State(state): State<AppState>,
    Json(req): Json<TaskCompleteRequest>,
) -> Result<Json<TaskCompleteResponse>, BrokerError> {
    state.complete(req)?;
    Ok(Json(TaskCompleteResponse { ok: true }))
}
