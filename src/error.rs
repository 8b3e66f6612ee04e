/// Engine-level error types

use crate::workflow::types::ExecutionStatus;
use thiserror::Error;
use uuid::Uuid;

/// Errors produced by the engine, the scheduler and the API flows built on them.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("workflow '{0}' not found")]
    WorkflowNotFound(Uuid),

    #[error("workflow '{0}' is disabled")]
    WorkflowDisabled(Uuid),

    /// Validation failed; carries the validator's error list.
    #[error("workflow is invalid: {}", .0.join("; "))]
    InvalidWorkflow(Vec<String>),

    #[error("execution '{0}' not found")]
    ExecutionNotFound(Uuid),

    /// Cancel was requested for an execution that already finished.
    #[error("execution '{id}' is no longer active (status: {status:?})")]
    ExecutionNotActive { id: Uuid, status: ExecutionStatus },

    #[error("no scheduled job for workflow '{0}'")]
    JobNotFound(Uuid),

    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Storage and other infrastructure failures.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<tokio_cron_scheduler::JobSchedulerError> for EngineError {
    fn from(err: tokio_cron_scheduler::JobSchedulerError) -> Self {
        EngineError::Scheduler(err.to_string())
    }
}

/// Failure of a single task attempt.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{method} {url} returned HTTP {status}")]
    HttpStatus {
        method: &'static str,
        url: String,
        status: u16,
    },

    #[error("JSONPath evaluation failed: {0}")]
    Expression(String),

    #[error("failed to serialize task output: {0}")]
    Serialization(#[from] serde_json::Error),
}
