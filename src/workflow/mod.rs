/// Workflow Management Layer
///
/// This module handles workflow definitions and their persistence:
/// - Type definitions (definitions, tasks, schedules, execution records)
/// - Typed task configuration parsed from raw JSON
/// - Structural validation of the task DAG
/// - SQLite persistence with sqlx

// Core workflow type definitions
pub mod types;

// Typed task configuration
pub mod task;

// Definition validation
pub mod validator;

// SQLite persistence layer for workflow storage
pub mod storage;

// Re-export commonly used types
pub use task::TaskKind;
pub use types::{
    ExecutionStatus, ScheduleType, TaskExecution, TaskStatus, TaskType, TriggerType, WorkflowDefinition,
    WorkflowExecution, WorkflowSchedule, WorkflowTask,
};
pub use validator::{validate, ValidationResult};
