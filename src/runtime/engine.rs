/// Petgraph-based workflow execution engine
///
/// Turns a workflow definition into a topologically ordered plan and runs it
/// as a background tokio task. Each run holds a semaphore permit, a
/// cancellation token and a wall-clock deadline. Every state change is written
/// through [`ExecutionHistory`], which stays the single source of truth.

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::runtime::executor::{TaskContext, TaskExecutor, TaskOutput};
use crate::runtime::history::ExecutionHistory;
use crate::workflow::storage::WorkflowStorage;
use crate::workflow::task::TaskKind;
use crate::workflow::types::{
    ExecutionStatus, TaskExecution, TaskStatus, TriggerType, WorkflowDefinition, WorkflowExecution, WorkflowTask,
};
use crate::workflow::validator;
use anyhow::Result;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde_json::{json, Map, Value};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{RwLock, Semaphore},
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const CANCELLED_MESSAGE: &str = "Execution cancelled";
const INTERRUPTED_MESSAGE: &str = "Interrupted by service restart";
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// A task paired with its parsed configuration, in dispatch order
#[derive(Debug, Clone)]
struct PlannedTask {
    task: WorkflowTask,
    kind: TaskKind,
}

/// Why a run stopped before its plan was exhausted
#[derive(Debug, Clone, Copy)]
enum Interrupt {
    Cancelled,
    TimedOut,
}

/// Outcome of one task after retries
enum TaskOutcome {
    Succeeded(TaskOutput),
    Failed { status: TaskStatus, error: String },
    Interrupted(Interrupt),
}

/// Terminal state a run wants to record
struct RunOutcome {
    status: ExecutionStatus,
    error: Option<String>,
}

impl RunOutcome {
    fn completed() -> Self {
        Self {
            status: ExecutionStatus::Completed,
            error: None,
        }
    }

    fn interrupted(interrupt: Interrupt, workflow: &WorkflowDefinition) -> Self {
        match interrupt {
            Interrupt::Cancelled => Self {
                status: ExecutionStatus::Cancelled,
                error: Some(CANCELLED_MESSAGE.to_string()),
            },
            Interrupt::TimedOut => Self {
                status: ExecutionStatus::TimedOut,
                error: Some(format!(
                    "Execution exceeded maximum execution time of {}s",
                    workflow.max_execution_time_seconds
                )),
            },
        }
    }
}

/// Workflow execution engine
///
/// Shared behind an `Arc` by the API layer and the scheduler.
#[derive(Debug)]
pub struct WorkflowEngine {
    storage: WorkflowStorage,
    history: ExecutionHistory,
    executor: TaskExecutor,
    config: EngineConfig,
    /// Bounds concurrently running executions
    permits: Arc<Semaphore>,
    /// Cancellation tokens of executions owned by this process
    running: RwLock<HashMap<Uuid, CancellationToken>>,
}

impl WorkflowEngine {
    pub fn new(
        storage: WorkflowStorage,
        history: ExecutionHistory,
        executor: TaskExecutor,
        config: EngineConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_executions.max(1)));
        Self {
            storage,
            history,
            executor,
            config,
            permits,
            running: RwLock::new(HashMap::new()),
        }
    }

    pub fn history(&self) -> &ExecutionHistory {
        &self.history
    }

    pub fn max_concurrent_executions(&self) -> usize {
        self.config.max_concurrent_executions.max(1)
    }

    /// Number of executions this process is currently driving (queued or running)
    pub async fn running_count(&self) -> usize {
        self.running.read().await.len()
    }

    /// Start an execution and return it in Pending state
    pub async fn trigger(
        self: &Arc<Self>,
        workflow_id: Uuid,
        trigger_type: TriggerType,
        triggered_by: Option<String>,
        input: Option<Value>,
    ) -> Result<WorkflowExecution, EngineError> {
        let (execution, _handle) = self
            .start_execution(workflow_id, trigger_type, triggered_by, input)
            .await?;
        Ok(execution)
    }

    /// Start an execution and hand back the join handle of its background run
    pub async fn start_execution(
        self: &Arc<Self>,
        workflow_id: Uuid,
        trigger_type: TriggerType,
        triggered_by: Option<String>,
        input: Option<Value>,
    ) -> Result<(WorkflowExecution, JoinHandle<()>), EngineError> {
        let workflow = self
            .storage
            .get_workflow(workflow_id)
            .await?
            .ok_or(EngineError::WorkflowNotFound(workflow_id))?;

        if !workflow.enabled {
            return Err(EngineError::WorkflowDisabled(workflow_id));
        }

        let validation = validator::validate(&workflow);
        if !validation.is_valid {
            return Err(EngineError::InvalidWorkflow(validation.errors));
        }

        let plan = build_plan(&workflow)?;

        let execution = WorkflowExecution::pending(workflow_id, trigger_type, triggered_by, input);
        self.history.create_execution(&execution).await?;

        let token = CancellationToken::new();
        self.running.write().await.insert(execution.id, token.clone());

        tracing::info!(
            "🎬 Execution {} queued for workflow '{}' ({:?})",
            execution.id,
            workflow.name,
            trigger_type
        );

        let engine = Arc::clone(self);
        let execution_id = execution.id;
        let run_input = execution.input.clone();
        let handle = tokio::spawn(async move {
            engine.run_execution(workflow, plan, execution_id, run_input, token).await;
        });

        Ok((execution, handle))
    }

    /// Cancel a pending or running execution
    ///
    /// The Cancelled status is written right away. A live run notices its
    /// token, abandons the in-flight task and stops. Rows without a live run
    /// (left over from another process) are cancelled directly.
    pub async fn cancel(&self, execution_id: Uuid) -> Result<WorkflowExecution, EngineError> {
        let execution = self
            .history
            .get_execution(execution_id)
            .await?
            .ok_or(EngineError::ExecutionNotFound(execution_id))?;

        if execution.status.is_terminal() {
            return Err(EngineError::ExecutionNotActive {
                id: execution_id,
                status: execution.status,
            });
        }

        if let Some(token) = self.running.read().await.get(&execution_id) {
            token.cancel();
        }

        if !self
            .history
            .finish_execution(execution_id, ExecutionStatus::Cancelled, Some(CANCELLED_MESSAGE))
            .await?
        {
            // Finished on its own between the read and the update
            let current = self
                .history
                .get_execution(execution_id)
                .await?
                .ok_or(EngineError::ExecutionNotFound(execution_id))?;
            return Err(EngineError::ExecutionNotActive {
                id: execution_id,
                status: current.status,
            });
        }

        tracing::info!("🛑 Execution {} cancelled", execution_id);

        self.history
            .get_execution(execution_id)
            .await?
            .ok_or(EngineError::ExecutionNotFound(execution_id))
    }

    /// Fail executions that a previous process left Pending or Running
    pub async fn recover_interrupted(&self) -> Result<u64> {
        let recovered = self.history.fail_interrupted(INTERRUPTED_MESSAGE).await?;
        if recovered > 0 {
            tracing::warn!("♻️ Marked {} interrupted execution(s) as failed", recovered);
        }
        Ok(recovered)
    }

    async fn run_execution(
        self: Arc<Self>,
        workflow: WorkflowDefinition,
        plan: Vec<PlannedTask>,
        execution_id: Uuid,
        input: Option<Value>,
        token: CancellationToken,
    ) {
        // Held until the terminal status is written
        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            permit = Arc::clone(&self.permits).acquire_owned() => permit.ok(),
        };

        let start_time = std::time::Instant::now();

        let result = match permit {
            Some(_) => self.drive(&workflow, &plan, execution_id, input, &token).await,
            None => Ok(Some(RunOutcome::interrupted(Interrupt::Cancelled, &workflow))),
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("💥 Execution {} aborted by internal error: {:#}", execution_id, e);
                Some(RunOutcome {
                    status: ExecutionStatus::Failed,
                    error: Some(format!("Internal error: {}", e)),
                })
            }
        };

        if let Some(outcome) = outcome {
            match self
                .history
                .finish_execution(execution_id, outcome.status, outcome.error.as_deref())
                .await
            {
                Ok(true) => tracing::info!(
                    "🏁 Execution {} of '{}' finished as {:?} in {:?}",
                    execution_id,
                    workflow.name,
                    outcome.status,
                    start_time.elapsed()
                ),
                Ok(false) => tracing::debug!(
                    "Execution {} already terminal, dropping {:?}",
                    execution_id,
                    outcome.status
                ),
                Err(e) => tracing::error!("❌ Failed to record outcome of execution {}: {}", execution_id, e),
            }
        }

        self.running.write().await.remove(&execution_id);
        drop(permit);
    }

    /// Run the plan. Returns `None` when the execution was finalized elsewhere.
    async fn drive(
        &self,
        workflow: &WorkflowDefinition,
        plan: &[PlannedTask],
        execution_id: Uuid,
        input: Option<Value>,
        token: &CancellationToken,
    ) -> Result<Option<RunOutcome>> {
        if !self.history.mark_running(execution_id).await? {
            return Ok(None);
        }

        let deadline = execution_deadline(Instant::now(), workflow.max_execution_time_seconds);
        tracing::info!(
            "🚀 Running execution {} of '{}' ({} tasks)",
            execution_id,
            workflow.name,
            plan.len()
        );

        let mut outputs = Map::new();
        // Skipped tasks and conditions that evaluated to false
        let mut blocked: HashSet<&str> = HashSet::new();

        for (step, planned) in plan.iter().enumerate() {
            let task = &planned.task;

            if token.is_cancelled() {
                return Ok(Some(RunOutcome::interrupted(Interrupt::Cancelled, workflow)));
            }
            if Instant::now() >= deadline {
                return Ok(Some(RunOutcome::interrupted(Interrupt::TimedOut, workflow)));
            }

            if let Some(upstream) = task.depends_on.iter().find(|dep| blocked.contains(dep.as_str())) {
                tracing::info!("⏭️ Skipping task '{}' (upstream '{}' did not pass)", task.id, upstream);
                let record = TaskExecution::skipped(
                    execution_id,
                    task,
                    format!("Skipped because upstream task '{}' did not pass", upstream),
                );
                self.history.insert_task_execution(&record).await?;
                blocked.insert(task.id.as_str());
                continue;
            }

            tracing::info!("📍 Step {}/{}: task '{}' ({:?})", step + 1, plan.len(), task.id, task.task_type);

            let record = TaskExecution::running(execution_id, task);
            self.history.insert_task_execution(&record).await?;

            let document = json!({ "input": input.clone().unwrap_or(Value::Null), "tasks": outputs });
            let context = TaskContext {
                workflow_id: workflow.id,
                execution_id,
                document: &document,
            };

            let (outcome, retries) = self
                .run_with_retries(workflow, planned, record.id, context, deadline, token)
                .await?;

            match outcome {
                TaskOutcome::Succeeded(output) => {
                    let result = serde_json::to_string(&output.value)?;
                    self.history
                        .finish_task_execution(record.id, TaskStatus::Completed, Some(&result), None, retries)
                        .await?;
                    if !output.should_continue {
                        blocked.insert(task.id.as_str());
                    }
                    outputs.insert(task.id.clone(), output.value);
                }
                TaskOutcome::Failed { status, error } => {
                    self.history
                        .finish_task_execution(record.id, status, None, Some(&error), retries)
                        .await?;
                    if task.continue_on_error {
                        tracing::warn!("⚠️ Task '{}' failed, continuing: {}", task.id, error);
                        continue;
                    }
                    return Ok(Some(RunOutcome {
                        status: ExecutionStatus::Failed,
                        error: Some(format!("Task '{}' failed: {}", task.name, error)),
                    }));
                }
                TaskOutcome::Interrupted(interrupt) => {
                    let outcome = RunOutcome::interrupted(interrupt, workflow);
                    self.history
                        .finish_task_execution(record.id, TaskStatus::Abandoned, None, outcome.error.as_deref(), retries)
                        .await?;
                    tracing::warn!("🛑 Task '{}' abandoned ({:?})", task.id, interrupt);
                    return Ok(Some(outcome));
                }
            }
        }

        Ok(Some(RunOutcome::completed()))
    }

    /// Run one task, retrying failures with exponential backoff
    ///
    /// Every attempt and every backoff sleep races the cancellation token and
    /// the execution deadline. Returns the outcome and the retries used.
    async fn run_with_retries(
        &self,
        workflow: &WorkflowDefinition,
        planned: &PlannedTask,
        task_execution_id: Uuid,
        context: TaskContext<'_>,
        deadline: Instant,
        token: &CancellationToken,
    ) -> Result<(TaskOutcome, u32)> {
        let task = &planned.task;
        let task_timeout = task
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.config.default_task_timeout());

        let mut retries = 0;
        loop {
            let attempt = tokio::select! {
                biased;
                _ = token.cancelled() => TaskOutcome::Interrupted(Interrupt::Cancelled),
                _ = tokio::time::sleep_until(deadline) => TaskOutcome::Interrupted(Interrupt::TimedOut),
                result = tokio::time::timeout(task_timeout, self.executor.execute_task(task, &planned.kind, context)) => {
                    match result {
                        Ok(Ok(output)) => TaskOutcome::Succeeded(output),
                        Ok(Err(e)) => TaskOutcome::Failed { status: TaskStatus::Failed, error: e.to_string() },
                        Err(_) => TaskOutcome::Failed {
                            status: TaskStatus::TimedOut,
                            error: format!("Task timed out after {:?}", task_timeout),
                        },
                    }
                }
            };

            let TaskOutcome::Failed { ref error, .. } = attempt else {
                return Ok((attempt, retries));
            };
            if retries >= workflow.max_retries {
                return Ok((attempt, retries));
            }

            retries += 1;
            let delay = self.config.retry_delay(retries);
            tracing::warn!(
                "🔁 Task '{}' attempt failed ({}), retry {}/{} in {:?}",
                task.id,
                error,
                retries,
                workflow.max_retries,
                delay
            );
            self.history.record_retry(task_execution_id, retries).await?;

            tokio::select! {
                biased;
                _ = token.cancelled() => return Ok((TaskOutcome::Interrupted(Interrupt::Cancelled), retries)),
                _ = tokio::time::sleep_until(deadline) => return Ok((TaskOutcome::Interrupted(Interrupt::TimedOut), retries)),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Deadline of an execution started at `now`
///
/// Budgets past what the clock can represent fall back to a century out.
fn execution_deadline(now: Instant, max_execution_time_seconds: u64) -> Instant {
    now.checked_add(Duration::from_secs(max_execution_time_seconds))
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Build the dispatch order of a workflow
///
/// Tasks become graph nodes and `dependsOn` entries become edges from the
/// dependency to the dependent. The topological order of that graph is the
/// order tasks run in.
fn build_plan(workflow: &WorkflowDefinition) -> Result<Vec<PlannedTask>, EngineError> {
    tracing::debug!("🏗️ Building execution plan for '{}'", workflow.name);

    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let mut index_of: HashMap<&str, NodeIndex> = HashMap::new();

    for (position, task) in workflow.tasks.iter().enumerate() {
        index_of.insert(task.id.as_str(), graph.add_node(position));
    }

    for task in &workflow.tasks {
        let to = index_of[task.id.as_str()];
        for dependency in &task.depends_on {
            let from = index_of.get(dependency.as_str()).ok_or_else(|| {
                EngineError::InvalidWorkflow(vec![format!(
                    "Task '{}' depends on non-existent task '{}'",
                    task.id, dependency
                )])
            })?;
            graph.add_edge(*from, to, ());
        }
    }

    let order = toposort(&graph, None).map_err(|cycle| {
        let task = &workflow.tasks[graph[cycle.node_id()]];
        EngineError::InvalidWorkflow(vec![format!("Cycle detected at task '{}'", task.id)])
    })?;

    let plan = order
        .into_iter()
        .map(|index| {
            let task = workflow.tasks[graph[index]].clone();
            let kind = TaskKind::from_task(&task).map_err(EngineError::InvalidWorkflow)?;
            Ok(PlannedTask { task, kind })
        })
        .collect::<Result<Vec<_>, EngineError>>()?;

    tracing::debug!(
        "📋 Execution order: {:?}",
        plan.iter().map(|p| p.task.id.as_str()).collect::<Vec<_>>()
    );

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::TaskType;
    use chrono::Utc;

    fn task(id: &str, depends_on: &[&str]) -> WorkflowTask {
        WorkflowTask {
            id: id.to_string(),
            name: id.to_string(),
            task_type: TaskType::Delay,
            config: json!({ "seconds": 0.001 }).as_object().cloned().unwrap(),
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
            timeout_seconds: None,
            continue_on_error: false,
        }
    }

    fn workflow(tasks: Vec<WorkflowTask>) -> WorkflowDefinition {
        WorkflowDefinition {
            id: Uuid::new_v4(),
            name: "plan".to_string(),
            description: None,
            tasks,
            schedule: None,
            enabled: true,
            max_execution_time_seconds: 60,
            max_retries: 0,
            tags: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn position(plan: &[PlannedTask], id: &str) -> usize {
        plan.iter().position(|p| p.task.id == id).unwrap()
    }

    #[test]
    fn plan_respects_dependencies() {
        // Declared out of order on purpose
        let wf = workflow(vec![
            task("publish", &["merge"]),
            task("merge", &["prices", "weather"]),
            task("weather", &[]),
            task("prices", &[]),
        ]);

        let plan = build_plan(&wf).unwrap();
        assert_eq!(plan.len(), 4);
        assert!(position(&plan, "prices") < position(&plan, "merge"));
        assert!(position(&plan, "weather") < position(&plan, "merge"));
        assert!(position(&plan, "merge") < position(&plan, "publish"));
    }

    #[test]
    fn oversized_budget_does_not_overflow_the_deadline() {
        let now = Instant::now();
        assert_eq!(execution_deadline(now, 60), now + Duration::from_secs(60));
        assert!(execution_deadline(now, u64::MAX) > now + Duration::from_secs(60));
        assert!(execution_deadline(now, i64::MAX as u64) > now);
    }

    #[test]
    fn plan_rejects_cycles() {
        let wf = workflow(vec![task("a", &["b"]), task("b", &["a"])]);
        assert!(matches!(build_plan(&wf), Err(EngineError::InvalidWorkflow(_))));
    }
}
