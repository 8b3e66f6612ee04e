/// Webhook trigger endpoint
///
/// Starts an execution of a workflow whose schedule type is Webhook. The
/// request body, when present, becomes the execution input.

use crate::api::{error::ApiError, AppState};
use crate::workflow::types::{ScheduleType, TriggerType, WorkflowExecution};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};
use serde_json::{json, Value};
use uuid::Uuid;

pub fn create_webhook_routes() -> Router<AppState> {
    Router::new().route("/webhooks/{workflow_id}", post(execute_webhook))
}

/// Execute a workflow via webhook trigger
///
/// POST /webhooks/{workflowId}
/// Body: JSON payload exposed to tasks as `$.input`
async fn execute_webhook(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    body: Bytes,
) -> Result<(StatusCode, Json<WorkflowExecution>), ApiError> {
    tracing::info!("📥 Webhook request received for workflow {}", workflow_id);

    // Parse JSON body manually to handle errors gracefully
    let input = if body.is_empty() {
        None
    } else {
        let payload: Value = serde_json::from_slice(&body).map_err(|e| {
            tracing::warn!("❌ Invalid JSON payload for webhook {}: {}", workflow_id, e);
            ApiError::new(StatusCode::BAD_REQUEST, "Invalid JSON payload").with_details(json!(e.to_string()))
        })?;
        Some(payload)
    };

    let accepts_webhooks = state
        .storage
        .get_workflow(workflow_id)
        .await?
        .and_then(|workflow| workflow.schedule)
        .is_some_and(|schedule| schedule.schedule_type == ScheduleType::Webhook);

    if !accepts_webhooks {
        tracing::warn!("❌ Webhook called for workflow without webhook schedule: {}", workflow_id);
        return Err(ApiError::not_found(format!("no webhook registered for workflow '{}'", workflow_id)));
    }

    let execution = state
        .engine
        .trigger(workflow_id, TriggerType::Webhook, Some("webhook".to_string()), input)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(execution)))
}
