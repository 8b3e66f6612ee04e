/// Scheduler REST API endpoints
///
/// Inspect registered jobs, fire them on demand and remove them.

use crate::api::{error::ApiError, AppState};
use crate::runtime::scheduler::SchedulerInfo;
use crate::workflow::types::WorkflowExecution;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde_json::{json, Value};
use uuid::Uuid;

pub fn create_scheduler_routes() -> Router<AppState> {
    Router::new()
        .route("/scheduler/jobs", get(list_jobs))
        .route("/scheduler/jobs/{workflow_id}", delete(remove_job))
        .route("/scheduler/jobs/{workflow_id}/trigger", post(trigger_job))
        .route("/scheduler/info", get(scheduler_info))
}

/// GET /scheduler/jobs
/// Returns: { "jobs": [...] }
async fn list_jobs(State(state): State<AppState>) -> Json<Value> {
    let jobs = state.scheduler.list_jobs().await;
    Json(json!({ "jobs": jobs }))
}

/// POST /scheduler/jobs/{workflowId}/trigger
async fn trigger_job(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> Result<(StatusCode, Json<WorkflowExecution>), ApiError> {
    let execution = state.scheduler.trigger_now(workflow_id).await?;
    tracing::info!("⚡ Job of workflow {} fired on demand: execution {}", workflow_id, execution.id);
    Ok((StatusCode::ACCEPTED, Json(execution)))
}

/// DELETE /scheduler/jobs/{workflowId}
///
/// Removes the job only; the workflow keeps its schedule and is registered
/// again on its next update or on restart.
async fn remove_job(State(state): State<AppState>, Path(workflow_id): Path<Uuid>) -> Result<StatusCode, ApiError> {
    if state.scheduler.unregister(workflow_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("no scheduled job for workflow '{}'", workflow_id)))
    }
}

/// GET /scheduler/info
async fn scheduler_info(State(state): State<AppState>) -> Json<SchedulerInfo> {
    Json(state.scheduler.info().await)
}
