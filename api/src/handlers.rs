use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::{get, post},
    Json, Router,
};
use common::{EnqueueResponse, JobStatusView};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::jobs;
use crate::queue::TaskQueue;

#[derive(Clone)]
pub struct ApiState {
    pub queue: Arc<dyn TaskQueue>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    #[serde(default = "default_args")]
    pub args: serde_json::Value,
}

// lo que se encola cuando el POST viene sin cuerpo
fn default_args() -> serde_json::Value {
    json!({"a": 1, "b": 2})
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/feature-extraction", post(submit_job))
        .route("/feature-extraction/:job_id", get(get_job_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

async fn submit_job(
    State(state): State<ApiState>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<Json<EnqueueResponse>, ApiError> {
    let args = match body {
        Ok(Json(req)) => req.args,
        Err(JsonRejection::MissingJsonContentType(_)) => default_args(),
        Err(rejection) => return Err(rejection.into()),
    };

    let id = jobs::submit(state.queue.as_ref(), args).await?;
    Ok(Json(EnqueueResponse { id }))
}

async fn get_job_status(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusView>, ApiError> {
    let view = jobs::get_status(state.queue.as_ref(), &job_id).await?;
    Ok(Json(view))
}
