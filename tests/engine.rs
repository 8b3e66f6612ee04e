use axum::{http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use gridflow::config::{DatabaseConfig, EngineConfig};
use gridflow::database;
use gridflow::error::EngineError;
use gridflow::runtime::{ExecutionHistory, ExecutionQuery, TaskExecutor, WorkflowEngine};
use gridflow::workflow::storage::WorkflowStorage;
use gridflow::workflow::types::{
    ExecutionStatus, TaskStatus, TaskType, TriggerType, WorkflowDefinition, WorkflowExecution, WorkflowTask,
    MAX_EXECUTION_TIME_LIMIT_SECS,
};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use uuid::Uuid;

struct Harness {
    storage: WorkflowStorage,
    engine: Arc<WorkflowEngine>,
}

impl Harness {
    async fn new(max_concurrent_executions: usize) -> Self {
        let pool = database::connect(&DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        })
        .await
        .unwrap();

        let storage = WorkflowStorage::new(pool.clone());
        let engine = WorkflowEngine::new(
            storage.clone(),
            ExecutionHistory::new(pool),
            TaskExecutor::new(Duration::from_secs(5)).unwrap(),
            EngineConfig {
                max_concurrent_executions,
                default_task_timeout_secs: 30,
                retry_base_delay_ms: 10,
                http_timeout_secs: 5,
            },
        );

        Self {
            storage,
            engine: Arc::new(engine),
        }
    }

    async fn store(&self, workflow: &WorkflowDefinition) {
        self.storage.save_workflow(workflow).await.unwrap();
    }

    /// Trigger, wait for the background run and reload the final record
    async fn run(&self, workflow: &WorkflowDefinition, input: Option<Value>) -> WorkflowExecution {
        let (execution, handle) = self
            .engine
            .start_execution(workflow.id, TriggerType::Manual, Some("test".into()), input)
            .await
            .unwrap();
        handle.await.unwrap();
        self.load(execution.id).await
    }

    async fn load(&self, execution_id: Uuid) -> WorkflowExecution {
        self.engine.history().get_execution(execution_id).await.unwrap().unwrap()
    }

    async fn wait_for_status(&self, execution_id: Uuid, status: ExecutionStatus) {
        for _ in 0..100 {
            if self.load(execution_id).await.status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("execution {} never reached {:?}", execution_id, status);
    }
}

fn task(id: &str, task_type: TaskType, config: Value, depends_on: &[&str]) -> WorkflowTask {
    WorkflowTask {
        id: id.to_string(),
        name: format!("{} task", id),
        task_type,
        config: config.as_object().cloned().unwrap(),
        depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
        timeout_seconds: None,
        continue_on_error: false,
    }
}

fn delay(id: &str, seconds: f64, depends_on: &[&str]) -> WorkflowTask {
    task(id, TaskType::Delay, json!({ "seconds": seconds }), depends_on)
}

fn workflow(tasks: Vec<WorkflowTask>) -> WorkflowDefinition {
    WorkflowDefinition {
        id: Uuid::new_v4(),
        name: "dispatch-plan".to_string(),
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

/// Local stand-in for the downstream forecasting service
async fn spawn_downstream() -> String {
    let app = Router::new()
        .route("/prices", get(|| async { Json(json!({ "prices": [41.5, 39.0, 44.2] })) }))
        .route("/broken", get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

#[tokio::test]
async fn dependent_task_starts_after_its_dependency_completes() {
    let harness = Harness::new(4).await;
    let wf = workflow(vec![delay("second", 0.01, &["first"]), delay("first", 0.05, &[])]);
    harness.store(&wf).await;

    let execution = harness.run(&wf, None).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.trigger_type, TriggerType::Manual);
    assert_eq!(execution.task_executions.len(), 2);

    let first = execution.task_execution("first").unwrap();
    let second = execution.task_execution("second").unwrap();
    assert_eq!(first.status, TaskStatus::Completed);
    assert_eq!(second.status, TaskStatus::Completed);
    assert!(second.started_at.unwrap() >= first.completed_at.unwrap());
    assert!(execution.completed_at.unwrap() >= execution.started_at.unwrap());
}

#[tokio::test]
async fn http_output_is_visible_to_later_tasks() {
    let harness = Harness::new(4).await;
    let base = spawn_downstream().await;

    let wf = workflow(vec![
        task("fetch", TaskType::Forecast, json!({ "url": format!("{}/prices", base), "method": "GET" }), &[]),
        task("cheapest", TaskType::Transform, json!({ "expression": "$.tasks.fetch.data.prices[1]" }), &["fetch"]),
        task("site", TaskType::Transform, json!({ "expression": "$.input.site" }), &[]),
    ]);
    harness.store(&wf).await;

    let execution = harness.run(&wf, Some(json!({ "site": "north" }))).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);

    let fetch: Value = serde_json::from_str(execution.task_execution("fetch").unwrap().result.as_deref().unwrap()).unwrap();
    assert_eq!(fetch["status"], json!(200));

    let cheapest = execution.task_execution("cheapest").unwrap();
    assert_eq!(cheapest.result.as_deref(), Some("39.0"));
    assert_eq!(execution.task_execution("site").unwrap().result.as_deref(), Some("\"north\""));
}

#[tokio::test]
async fn failing_task_fails_the_execution_and_stops_dispatch() {
    let harness = Harness::new(4).await;
    let base = spawn_downstream().await;

    let wf = workflow(vec![
        task("call", TaskType::HttpCall, json!({ "url": format!("{}/broken", base) }), &[]),
        delay("after", 0.0, &["call"]),
    ]);
    harness.store(&wf).await;

    let execution = harness.run(&wf, None).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    let message = execution.error_message.clone().unwrap();
    assert!(message.starts_with("Task 'call task' failed"), "{}", message);
    assert!(message.contains("500"), "{}", message);

    assert_eq!(execution.task_execution("call").unwrap().status, TaskStatus::Failed);
    assert!(execution.task_execution("after").is_none());
}

#[tokio::test]
async fn continue_on_error_lets_dependents_run() {
    let harness = Harness::new(4).await;
    let base = spawn_downstream().await;

    let mut call = task("call", TaskType::HttpCall, json!({ "url": format!("{}/broken", base) }), &[]);
    call.continue_on_error = true;
    let wf = workflow(vec![call, delay("after", 0.0, &["call"])]);
    harness.store(&wf).await;

    let execution = harness.run(&wf, None).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.task_execution("call").unwrap().status, TaskStatus::Failed);
    assert_eq!(execution.task_execution("after").unwrap().status, TaskStatus::Completed);
}

#[tokio::test]
async fn false_condition_skips_transitive_dependents() {
    let harness = Harness::new(4).await;
    let wf = workflow(vec![
        task("gate", TaskType::Condition, json!({ "expression": "$.input.publish", "equals": true }), &[]),
        delay("publish", 0.0, &["gate"]),
        delay("notify", 0.0, &["publish"]),
        delay("audit", 0.0, &[]),
    ]);
    harness.store(&wf).await;

    let execution = harness.run(&wf, Some(json!({ "publish": false }))).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.task_execution("gate").unwrap().status, TaskStatus::Completed);
    assert_eq!(execution.task_execution("publish").unwrap().status, TaskStatus::Skipped);
    assert_eq!(execution.task_execution("notify").unwrap().status, TaskStatus::Skipped);
    assert_eq!(execution.task_execution("audit").unwrap().status, TaskStatus::Completed);
}

#[tokio::test]
async fn task_timeout_is_retried_then_fails() {
    let harness = Harness::new(4).await;
    let mut slow = delay("slow", 5.0, &[]);
    slow.timeout_seconds = Some(1);
    let mut wf = workflow(vec![slow]);
    wf.max_retries = 1;
    harness.store(&wf).await;

    let execution = harness.run(&wf, None).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    let slow = execution.task_execution("slow").unwrap();
    assert_eq!(slow.status, TaskStatus::TimedOut);
    assert_eq!(slow.retry_count, 1);
}

#[tokio::test]
async fn execution_deadline_marks_timed_out() {
    let harness = Harness::new(4).await;
    let mut wf = workflow(vec![delay("long", 10.0, &[]), delay("never", 0.0, &["long"])]);
    wf.max_execution_time_seconds = 1;
    harness.store(&wf).await;

    let execution = harness.run(&wf, None).await;

    assert_eq!(execution.status, ExecutionStatus::TimedOut);
    assert_eq!(execution.task_execution("long").unwrap().status, TaskStatus::Abandoned);
    assert!(execution.task_execution("never").is_none());
}

#[tokio::test]
async fn cancel_abandons_the_in_flight_task() {
    let harness = Harness::new(4).await;
    let wf = workflow(vec![delay("long", 10.0, &[])]);
    harness.store(&wf).await;

    let (execution, handle) = harness
        .engine
        .start_execution(wf.id, TriggerType::Api, None, None)
        .await
        .unwrap();
    harness.wait_for_status(execution.id, ExecutionStatus::Running).await;

    let cancelled = harness.engine.cancel(execution.id).await.unwrap();
    assert_eq!(cancelled.status, ExecutionStatus::Cancelled);

    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("run stops promptly after cancel")
        .unwrap();

    let stored = harness.load(execution.id).await;
    assert_eq!(stored.status, ExecutionStatus::Cancelled);
    assert_eq!(stored.task_execution("long").unwrap().status, TaskStatus::Abandoned);
    assert_eq!(harness.engine.running_count().await, 0);

    match harness.engine.cancel(execution.id).await {
        Err(EngineError::ExecutionNotActive { status, .. }) => assert_eq!(status, ExecutionStatus::Cancelled),
        other => panic!("expected ExecutionNotActive, got {:?}", other),
    }
}

#[tokio::test]
async fn concurrency_limit_queues_executions() {
    let harness = Harness::new(1).await;
    let wf = workflow(vec![delay("work", 0.2, &[])]);
    harness.store(&wf).await;

    let (first, first_handle) = harness
        .engine
        .start_execution(wf.id, TriggerType::Manual, None, None)
        .await
        .unwrap();
    let (second, second_handle) = harness
        .engine
        .start_execution(wf.id, TriggerType::Manual, None, None)
        .await
        .unwrap();

    first_handle.await.unwrap();
    second_handle.await.unwrap();

    let first = harness.load(first.id).await;
    let second = harness.load(second.id).await;
    assert_eq!(first.status, ExecutionStatus::Completed);
    assert_eq!(second.status, ExecutionStatus::Completed);

    let (earlier, later) = if first.started_at <= second.started_at {
        (first, second)
    } else {
        (second, first)
    };
    assert!(later.started_at.unwrap() >= earlier.completed_at.unwrap());
}

#[tokio::test]
async fn trigger_rejects_missing_disabled_and_invalid_workflows() {
    let harness = Harness::new(4).await;

    let missing = Uuid::new_v4();
    assert!(matches!(
        harness.engine.trigger(missing, TriggerType::Manual, None, None).await,
        Err(EngineError::WorkflowNotFound(id)) if id == missing
    ));

    let mut disabled = workflow(vec![delay("a", 0.0, &[])]);
    disabled.enabled = false;
    harness.store(&disabled).await;
    assert!(matches!(
        harness.engine.trigger(disabled.id, TriggerType::Manual, None, None).await,
        Err(EngineError::WorkflowDisabled(_))
    ));

    let cyclic = workflow(vec![delay("a", 0.0, &["b"]), delay("b", 0.0, &["a"])]);
    harness.store(&cyclic).await;
    match harness.engine.trigger(cyclic.id, TriggerType::Manual, None, None).await {
        Err(EngineError::InvalidWorkflow(errors)) => {
            assert!(errors.iter().any(|e| e.starts_with("Cycle detected")), "{:?}", errors)
        }
        other => panic!("expected InvalidWorkflow, got {:?}", other),
    }
}

#[tokio::test]
async fn longest_execution_budget_runs_to_completion() {
    let harness = Harness::new(4).await;
    let mut wf = workflow(vec![delay("a", 0.0, &[])]);
    wf.max_execution_time_seconds = MAX_EXECUTION_TIME_LIMIT_SECS;
    harness.store(&wf).await;

    let finished = harness.run(&wf, None).await;
    assert_eq!(finished.status, ExecutionStatus::Completed);
    assert_eq!(harness.engine.running_count().await, 0);
}

#[tokio::test]
async fn oversized_budget_is_rejected_before_any_run() {
    let harness = Harness::new(4).await;
    let mut wf = workflow(vec![delay("a", 0.0, &[])]);
    wf.max_execution_time_seconds = i64::MAX as u64;
    harness.store(&wf).await;

    match harness.engine.trigger(wf.id, TriggerType::Manual, None, None).await {
        Err(EngineError::InvalidWorkflow(errors)) => assert!(
            errors.iter().any(|e| e.starts_with("maxExecutionTimeSeconds must not exceed")),
            "{:?}",
            errors
        ),
        other => panic!("expected InvalidWorkflow, got {:?}", other),
    }

    let executions = harness
        .engine
        .history()
        .list_executions(&ExecutionQuery {
            workflow_id: Some(wf.id),
            status: None,
            limit: 10,
        })
        .await
        .unwrap();
    assert!(executions.is_empty());
    assert_eq!(harness.engine.running_count().await, 0);
}

#[tokio::test]
async fn recovery_fails_orphaned_executions() {
    let harness = Harness::new(4).await;
    let orphan = WorkflowExecution::pending(Uuid::new_v4(), TriggerType::Scheduled, None, None);
    harness.engine.history().create_execution(&orphan).await.unwrap();

    assert_eq!(harness.engine.recover_interrupted().await.unwrap(), 1);

    let stored = harness.load(orphan.id).await;
    assert_eq!(stored.status, ExecutionStatus::Failed);
    assert_eq!(stored.error_message.as_deref(), Some("Interrupted by service restart"));
}
