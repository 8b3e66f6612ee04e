/// gridflow: workflow orchestration for energy-management services
///
/// This library provides the workflow engine: typed task DAGs stored in
/// SQLite, validation, bounded and cancellable execution, cron and interval
/// scheduling, and the REST API on top.

// Core configuration and setup
pub mod config;

// Domain error types
pub mod error;

// SQLite pool and schema
pub mod database;

// Workflow management layer - definitions, typed task config, validation, storage
pub mod workflow;

// Runtime layer - execution engine, task handlers, history and scheduler
pub mod runtime;

// HTTP API layer - REST endpoints for workflows, executions, scheduler and webhooks
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use error::{EngineError, TaskError};
pub use runtime::{WorkflowEngine, WorkflowScheduler};
pub use server::start_server;
pub use workflow::{WorkflowDefinition, WorkflowExecution, WorkflowTask};
