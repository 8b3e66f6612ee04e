/// Core workflow type definitions
///
/// Defines workflow definitions, their tasks and schedules, and the execution
/// records produced when a workflow runs. All types serialize as camelCase JSON,
/// both on the REST surface and inside the JSON columns of the store.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Default wall-clock budget for a single workflow execution
pub const DEFAULT_MAX_EXECUTION_TIME_SECS: u64 = 3600;

/// Largest accepted execution budget: one week
pub const MAX_EXECUTION_TIME_LIMIT_SECS: u64 = 7 * 24 * 60 * 60;

/// A complete workflow definition: a DAG of tasks plus scheduling metadata
///
/// Owned by the API layer and mutated only through CRUD. Executions refer to
/// a definition by id and never own it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// Server-assigned workflow identifier
    pub id: Uuid,
    /// Human-readable workflow name
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Tasks of this workflow; `depends_on` edges must stay inside this list
    pub tasks: Vec<WorkflowTask>,
    /// Optional trigger schedule (cron, interval, webhook or manual)
    #[serde(default)]
    pub schedule: Option<WorkflowSchedule>,
    /// Disabled workflows are never scheduled or triggered
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Upper bound for a whole execution, after which it is marked TimedOut
    #[serde(default = "default_max_execution_time")]
    pub max_execution_time_seconds: u64,
    /// Retry budget applied to every task of this workflow
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    /// Look up a task by its id
    pub fn task(&self, task_id: &str) -> Option<&WorkflowTask> {
        self.tasks.iter().find(|task| task.id == task_id)
    }

    /// Whether this workflow should hold a job in the scheduler
    pub fn is_schedulable(&self) -> bool {
        self.enabled
            && self
                .schedule
                .as_ref()
                .is_some_and(|schedule| schedule.schedule_type.is_timed())
    }
}

fn default_enabled() -> bool {
    true
}

fn default_max_execution_time() -> u64 {
    DEFAULT_MAX_EXECUTION_TIME_SECS
}

/// A single task in the workflow DAG
///
/// `config` stays an untyped JSON object on the wire. It is parsed into a
/// [`TaskKind`](crate::workflow::task::TaskKind) during validation and
/// execution planning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowTask {
    /// Task identifier, unique within the workflow (e.g. "fetch-prices")
    pub id: String,
    pub name: String,
    /// Determines which handler runs the task
    #[serde(rename = "type")]
    pub task_type: TaskType,
    /// Type-specific configuration, e.g. { "url": "...", "method": "POST" }
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Ids of tasks that must finish before this one is dispatched
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Per-attempt timeout; the engine default applies when absent
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    /// Keep running the workflow when this task fails
    #[serde(default)]
    pub continue_on_error: bool,
}

/// Available task types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    /// Outbound HTTP request
    /// Expected config: { "url": "https://...", "method": "GET", "headers": {...}, "body": ... }
    HttpCall,
    /// Sleep for a fixed duration
    /// Expected config: { "seconds": 5 }
    Delay,
    /// JSONPath predicate over the execution document
    /// Expected config: { "expression": "$.tasks.fetch.status", "equals": 200 }
    Condition,
    /// JSONPath projection over the execution document
    /// Expected config: { "expression": "$.tasks.fetch.data.items" }
    Transform,
    /// Log line or webhook post
    /// Expected config: { "message": "...", "channel": "ops", "url": "https://..." }
    Notification,
    /// HTTP call to the forecasting service (POST by default)
    Forecast,
    /// HTTP call to the optimization service (POST by default)
    Optimization,
}

/// How a workflow gets triggered
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSchedule {
    #[serde(rename = "type")]
    pub schedule_type: ScheduleType,
    /// Six or seven field cron expression, seconds first
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub interval_seconds: Option<u64>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Fires before this instant are ignored
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    /// Fires after this instant are ignored
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl WorkflowSchedule {
    /// IANA timezone that cron expressions are evaluated in
    pub fn tz(&self) -> Option<Tz> {
        self.timezone.trim().parse::<Tz>().ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleType {
    Cron,
    Interval,
    Webhook,
    Manual,
}

impl ScheduleType {
    /// Cron and Interval schedules are driven by the scheduler
    pub fn is_timed(self) -> bool {
        matches!(self, ScheduleType::Cron | ScheduleType::Interval)
    }
}

/// Lifecycle of a workflow execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl ExecutionStatus {
    /// Terminal statuses never change again
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Pending | ExecutionStatus::Running)
    }
}

/// Lifecycle of a single task inside an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
    /// Not dispatched because an upstream condition evaluated to false
    Skipped,
    /// In flight when the execution was cancelled or ran out of time
    Abandoned,
}

/// Why an execution started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerType {
    Scheduled,
    Manual,
    Webhook,
    Api,
}

/// One run of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub id: Uuid,
    /// Back-reference to the definition that was run
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub task_executions: Vec<TaskExecution>,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub triggered_by: Option<String>,
    /// Payload supplied by a webhook or trigger request
    #[serde(default)]
    pub input: Option<Value>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    /// Fresh execution record in Pending state
    pub fn pending(
        workflow_id: Uuid,
        trigger_type: TriggerType,
        triggered_by: Option<String>,
        input: Option<Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            status: ExecutionStatus::Pending,
            task_executions: Vec::new(),
            trigger_type,
            triggered_by,
            input,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn task_execution(&self, task_id: &str) -> Option<&TaskExecution> {
        self.task_executions.iter().find(|te| te.task_id == task_id)
    }
}

/// Record of one task inside one execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExecution {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub task_id: String,
    /// Denormalized so history survives definition edits
    pub task_name: String,
    pub status: TaskStatus,
    /// Task output as JSON text
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskExecution {
    /// Record for a task that is about to be dispatched
    pub fn running(execution_id: Uuid, task: &WorkflowTask) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            status: TaskStatus::Running,
            result: None,
            error_message: None,
            retry_count: 0,
            started_at: Some(Utc::now()),
            completed_at: None,
        }
    }

    /// Record for a task that will not run at all
    pub fn skipped(execution_id: Uuid, task: &WorkflowTask, reason: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            execution_id,
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            status: TaskStatus::Skipped,
            result: None,
            error_message: Some(reason),
            retry_count: 0,
            started_at: None,
            completed_at: Some(now),
        }
    }
}
