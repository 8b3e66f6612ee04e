/// Workflow management REST API endpoints
///
/// Provides CRUD operations for workflow definitions, dry-run validation and
/// manual triggers. Every create, update and delete keeps the scheduler in
/// sync with the stored definition.

use crate::api::{error::ApiError, AppState};
use crate::workflow::{
    types::{
        TriggerType, WorkflowDefinition, WorkflowExecution, WorkflowSchedule, WorkflowTask,
        DEFAULT_MAX_EXECUTION_TIME_SECS,
    },
    validator::{self, ValidationResult},
};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Request body for creating, updating or validating a workflow
///
/// Ids and timestamps are assigned by the server.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tasks: Vec<WorkflowTask>,
    #[serde(default)]
    pub schedule: Option<WorkflowSchedule>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub max_execution_time_seconds: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl WorkflowRequest {
    fn into_definition(self, id: Uuid, created_at: DateTime<Utc>) -> WorkflowDefinition {
        WorkflowDefinition {
            id,
            name: self.name,
            description: self.description,
            tasks: self.tasks,
            schedule: self.schedule,
            enabled: self.enabled.unwrap_or(true),
            max_execution_time_seconds: self
                .max_execution_time_seconds
                .unwrap_or(DEFAULT_MAX_EXECUTION_TIME_SECS),
            max_retries: self.max_retries.unwrap_or(0),
            tags: self.tags,
            created_at,
            updated_at: Utc::now(),
        }
    }
}

/// Stored definition plus the warnings raised while validating it
#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    #[serde(flatten)]
    pub workflow: WorkflowDefinition,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Optional body of a manual trigger
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    #[serde(default)]
    pub triggered_by: Option<String>,
    #[serde(default)]
    pub input: Option<Value>,
}

/// Create workflow management routes
pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/workflows", get(list_workflows).post(create_workflow))
        .route("/workflows/validate", post(validate_workflow))
        .route(
            "/workflows/{id}",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
        .route("/workflows/{id}/trigger", post(trigger_workflow))
}

fn invalid(result: ValidationResult) -> Response {
    (StatusCode::BAD_REQUEST, Json(result)).into_response()
}

/// Create a new workflow
///
/// POST /workflows
/// Returns 201 with the stored definition and any validation warnings, or 400
/// with the validation result.
async fn create_workflow(
    State(state): State<AppState>,
    Json(payload): Json<WorkflowRequest>,
) -> Result<Response, ApiError> {
    let workflow = payload.into_definition(Uuid::new_v4(), Utc::now());

    let validation = validator::validate(&workflow);
    if !validation.is_valid {
        tracing::warn!("❌ Rejected workflow '{}': {:?}", workflow.name, validation.errors);
        return Ok(invalid(validation));
    }

    state.storage.save_workflow(&workflow).await?;

    if let Err(e) = state.scheduler.register(&workflow).await {
        tracing::error!("❌ Failed to schedule workflow {}: {}", workflow.id, e);
        state.storage.delete_workflow(workflow.id).await?;
        return Err(e.into());
    }

    tracing::info!(
        "🔥 Created workflow: {} ({}) with {} warning(s)",
        workflow.id,
        workflow.name,
        validation.warnings.len()
    );

    let response = WorkflowResponse {
        workflow,
        warnings: validation.warnings,
    };
    Ok((StatusCode::CREATED, Json(response)).into_response())
}

/// List all workflows
///
/// GET /workflows
/// Returns: { "workflows": [...] }
async fn list_workflows(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let workflows = state.storage.list_workflows().await?;
    Ok(Json(json!({ "workflows": workflows })))
}

/// Get a specific workflow by ID
///
/// GET /workflows/{id}
async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkflowDefinition>, ApiError> {
    state
        .storage
        .get_workflow(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("workflow '{}' not found", id)))
}

/// Replace an existing workflow
///
/// PUT /workflows/{id}
/// Keeps the id and creation time. The schedule is re-registered; if that
/// fails, the previous definition and its schedule are restored.
async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<WorkflowRequest>,
) -> Result<Response, ApiError> {
    let previous = state
        .storage
        .get_workflow(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("workflow '{}' not found", id)))?;

    let workflow = payload.into_definition(id, previous.created_at);

    let validation = validator::validate(&workflow);
    if !validation.is_valid {
        tracing::warn!("❌ Rejected update of workflow {}: {:?}", id, validation.errors);
        return Ok(invalid(validation));
    }

    state.storage.save_workflow(&workflow).await?;

    if let Err(e) = state.scheduler.register(&workflow).await {
        tracing::error!("❌ Failed to reschedule workflow {}, restoring previous version: {}", id, e);
        state.storage.save_workflow(&previous).await?;
        if let Err(restore) = state.scheduler.register(&previous).await {
            tracing::error!("❌ Failed to restore schedule of workflow {}: {}", id, restore);
        }
        return Err(e.into());
    }

    tracing::info!("🔥 Updated workflow: {} ({})", workflow.id, workflow.name);
    let response = WorkflowResponse {
        workflow,
        warnings: validation.warnings,
    };
    Ok(Json(response).into_response())
}

/// Delete a workflow
///
/// DELETE /workflows/{id}
/// Its schedule is removed; execution history is kept.
async fn delete_workflow(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, ApiError> {
    state.scheduler.unregister(id).await?;

    if state.storage.delete_workflow(id).await? {
        tracing::info!("🗑️ Deleted workflow: {}", id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("workflow '{}' not found", id)))
    }
}

/// Validate a workflow without storing it
///
/// POST /workflows/validate
/// Always 200; the body tells whether the definition is valid.
async fn validate_workflow(Json(payload): Json<WorkflowRequest>) -> Json<ValidationResult> {
    let workflow = payload.into_definition(Uuid::nil(), Utc::now());
    Json(validator::validate(&workflow))
}

/// Start an execution of a workflow
///
/// POST /workflows/{id}/trigger
/// Body (optional): { "triggeredBy": "...", "input": {...} }
/// Returns 202 with the pending execution.
async fn trigger_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<(StatusCode, Json<WorkflowExecution>), ApiError> {
    let request: TriggerRequest = if body.is_empty() {
        TriggerRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            ApiError::new(StatusCode::BAD_REQUEST, "Invalid trigger body").with_details(json!(e.to_string()))
        })?
    };

    let execution = state
        .engine
        .trigger(
            id,
            TriggerType::Manual,
            request.triggered_by.or_else(|| Some("api".to_string())),
            request.input,
        )
        .await?;

    Ok((StatusCode::ACCEPTED, Json(execution)))
}
