/// Runtime Execution Layer
///
/// This module runs workflows and keeps their history. It handles:
/// - Planning task order from the dependency DAG with petgraph
/// - Bounded, cancellable background executions with tokio
/// - Per-task handlers (HTTP, delay, JSONPath, notifications)
/// - Cron and interval scheduling

// Execution engine: planning, retries, timeouts, cancellation
pub mod engine;

// Per-task-kind handlers
pub mod executor;

// SQLite-backed execution records
pub mod history;

// Background scheduler service for cron and interval schedules
pub mod scheduler;

// Re-export main types
pub use engine::WorkflowEngine;
pub use executor::{TaskContext, TaskExecutor, TaskOutput};
pub use history::{ExecutionHistory, ExecutionQuery};
pub use scheduler::{CronSchedulerService, ScheduledJob, SchedulerInfo, WorkflowScheduler};
