/// HTTP API Layer
///
/// This module provides the REST endpoints of the service:
/// - Workflow CRUD, validation and manual triggers
/// - Execution history and cancellation
/// - Scheduler job inspection and control
/// - Webhook triggers

use crate::{
    runtime::{engine::WorkflowEngine, scheduler::WorkflowScheduler},
    workflow::storage::WorkflowStorage,
};
use axum::Router;
use std::sync::Arc;

// Error to HTTP response mapping
pub mod error;

// Workflow management endpoints
pub mod workflows;

// Execution history endpoints
pub mod executions;

// Scheduler endpoints
pub mod scheduler;

// Webhook trigger endpoint
pub mod webhooks;

pub use error::ApiError;

/// Application state shared by every handler
#[derive(Clone)]
pub struct AppState {
    /// Workflow definition store
    pub storage: WorkflowStorage,
    /// Execution engine (also owns the execution history)
    pub engine: Arc<WorkflowEngine>,
    /// Scheduler kept in sync with workflow changes
    pub scheduler: Arc<dyn WorkflowScheduler>,
}

/// All API routes, without state applied
pub fn create_api_routes() -> Router<AppState> {
    Router::new()
        .merge(workflows::create_workflow_routes())
        .merge(executions::create_execution_routes())
        .merge(scheduler::create_scheduler_routes())
        .merge(webhooks::create_webhook_routes())
}
