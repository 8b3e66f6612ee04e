/// HTTP error mapping
///
/// Every handler error becomes a JSON body `{ "error": ..., "details": ... }`
/// with a status code derived from the engine error.

use crate::error::EngineError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::{json, Value};

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    details: Option<Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::WorkflowNotFound(_) | EngineError::ExecutionNotFound(_) | EngineError::JobNotFound(_) => {
                Self::not_found(err.to_string())
            }
            EngineError::InvalidWorkflow(errors) => {
                Self::new(StatusCode::BAD_REQUEST, "Workflow validation failed").with_details(json!(errors))
            }
            EngineError::WorkflowDisabled(_) | EngineError::ExecutionNotActive { .. } => {
                Self::new(StatusCode::CONFLICT, err.to_string())
            }
            EngineError::Scheduler(message) => {
                Self::new(StatusCode::BAD_REQUEST, "Schedule could not be registered").with_details(json!(message))
            }
            EngineError::Internal(e) => {
                tracing::error!("💥 Internal error: {:#}", e);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Internal(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.details {
            Some(details) => json!({ "error": self.message, "details": details }),
            None => json!({ "error": self.message }),
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::ExecutionStatus;
    use uuid::Uuid;

    #[test]
    fn engine_errors_map_to_status_codes() {
        let id = Uuid::new_v4();
        let cases = [
            (EngineError::WorkflowNotFound(id), StatusCode::NOT_FOUND),
            (EngineError::JobNotFound(id), StatusCode::NOT_FOUND),
            (EngineError::WorkflowDisabled(id), StatusCode::CONFLICT),
            (
                EngineError::ExecutionNotActive {
                    id,
                    status: ExecutionStatus::Completed,
                },
                StatusCode::CONFLICT,
            ),
            (EngineError::InvalidWorkflow(vec!["bad".into()]), StatusCode::BAD_REQUEST),
            (EngineError::Internal(anyhow::anyhow!("disk on fire")), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status, expected);
        }
    }
}
