/// Execution history REST API endpoints
///
/// Read access to executions and their task records, plus cancellation.

use crate::api::{error::ApiError, AppState};
use crate::runtime::history::ExecutionQuery;
use crate::workflow::types::{ExecutionStatus, WorkflowExecution};
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

const DEFAULT_LIST_LIMIT: u32 = 50;
const MAX_LIST_LIMIT: u32 = 500;

/// Query string of GET /executions
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListExecutionsParams {
    pub workflow_id: Option<Uuid>,
    pub status: Option<ExecutionStatus>,
    pub limit: Option<u32>,
}

impl ListExecutionsParams {
    fn into_query(self) -> ExecutionQuery {
        ExecutionQuery {
            workflow_id: self.workflow_id,
            status: self.status,
            limit: self.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT),
        }
    }
}

pub fn create_execution_routes() -> Router<AppState> {
    Router::new()
        .route("/executions", get(list_executions))
        .route("/executions/{id}", get(get_execution))
        .route("/executions/{id}/cancel", post(cancel_execution))
}

/// List executions, newest first
///
/// GET /executions?workflowId=&status=&limit=
/// Returns: { "executions": [...] }
async fn list_executions(
    State(state): State<AppState>,
    Query(params): Query<ListExecutionsParams>,
) -> Result<Json<Value>, ApiError> {
    let executions = state.engine.history().list_executions(&params.into_query()).await?;
    Ok(Json(json!({ "executions": executions })))
}

/// GET /executions/{id}
async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkflowExecution>, ApiError> {
    state
        .engine
        .history()
        .get_execution(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("execution '{}' not found", id)))
}

/// POST /executions/{id}/cancel
///
/// 200 with the cancelled execution, 409 if it already finished.
async fn cancel_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkflowExecution>, ApiError> {
    Ok(Json(state.engine.cancel(id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_defaults_and_is_capped() {
        assert_eq!(ListExecutionsParams::default().into_query().limit, 50);

        let params = ListExecutionsParams {
            limit: Some(10_000),
            ..Default::default()
        };
        assert_eq!(params.into_query().limit, 500);

        let params = ListExecutionsParams {
            limit: Some(0),
            ..Default::default()
        };
        assert_eq!(params.into_query().limit, 1);
    }
}
