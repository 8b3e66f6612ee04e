/// Execution history persistence
///
/// Stores workflow executions and their per-task records. The database is the
/// single source of truth for execution state. Every terminal transition is a
/// conditional UPDATE, so the first terminal status written wins and later
/// writers become no-ops.

use crate::database::{enum_from_text, enum_to_text, timestamp_from_text, timestamp_to_text};
use crate::workflow::types::{ExecutionStatus, TaskExecution, TaskStatus, TriggerType, WorkflowExecution};
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::{SqlitePool, SqliteRow}, Row};
use uuid::Uuid;

/// Filter for listing executions
#[derive(Debug, Clone, Default)]
pub struct ExecutionQuery {
    pub workflow_id: Option<Uuid>,
    pub status: Option<ExecutionStatus>,
    pub limit: u32,
}

/// SQLite-backed execution history
#[derive(Debug, Clone)]
pub struct ExecutionHistory {
    pool: SqlitePool,
}

impl ExecutionHistory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new execution row (normally in Pending state)
    pub async fn create_execution(&self, execution: &WorkflowExecution) -> Result<()> {
        let input_json = execution.input.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO workflow_executions
                (id, workflow_id, status, trigger_type, triggered_by, input, error_message,
                 created_at, started_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(enum_to_text(&execution.status)?)
        .bind(enum_to_text(&execution.trigger_type)?)
        .bind(&execution.triggered_by)
        .bind(&input_json)
        .bind(&execution.error_message)
        .bind(timestamp_to_text(&execution.created_at))
        .bind(execution.started_at.as_ref().map(timestamp_to_text))
        .bind(execution.completed_at.as_ref().map(timestamp_to_text))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Move a Pending execution to Running
    ///
    /// Returns false when the execution already left Pending (e.g. cancelled
    /// while queued for a worker slot).
    pub async fn mark_running(&self, execution_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE workflow_executions SET status = 'Running', started_at = ? WHERE id = ? AND status = 'Pending'",
        )
        .bind(timestamp_to_text(&Utc::now()))
        .bind(execution_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a terminal status unless another terminal status got there first
    pub async fn finish_execution(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        error_message: Option<&str>,
    ) -> Result<bool> {
        debug_assert!(status.is_terminal());

        let result = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET status = ?, error_message = ?, completed_at = ?
            WHERE id = ? AND status IN ('Pending', 'Running')
            "#,
        )
        .bind(enum_to_text(&status)?)
        .bind(error_message)
        .bind(timestamp_to_text(&Utc::now()))
        .bind(execution_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Fail every execution a previous process left behind in Pending or Running
    ///
    /// In-flight task rows of those executions are marked Abandoned.
    pub async fn fail_interrupted(&self, reason: &str) -> Result<u64> {
        let now = timestamp_to_text(&Utc::now());

        sqlx::query(
            r#"
            UPDATE task_executions
            SET status = 'Abandoned', error_message = ?, completed_at = ?
            WHERE status IN ('Pending', 'Running')
              AND execution_id IN (
                  SELECT id FROM workflow_executions WHERE status IN ('Pending', 'Running')
              )
            "#,
        )
        .bind(reason)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let result = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET status = 'Failed', error_message = ?, completed_at = ?
            WHERE status IN ('Pending', 'Running')
            "#,
        )
        .bind(reason)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Insert a task execution record
    pub async fn insert_task_execution(&self, task: &TaskExecution) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO task_executions
                (id, execution_id, task_id, task_name, status, result, error_message,
                 retry_count, started_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.id.to_string())
        .bind(task.execution_id.to_string())
        .bind(&task.task_id)
        .bind(&task.task_name)
        .bind(enum_to_text(&task.status)?)
        .bind(&task.result)
        .bind(&task.error_message)
        .bind(task.retry_count as i64)
        .bind(task.started_at.as_ref().map(timestamp_to_text))
        .bind(task.completed_at.as_ref().map(timestamp_to_text))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Bump the retry counter of an in-flight task
    pub async fn record_retry(&self, task_execution_id: Uuid, retry_count: u32) -> Result<()> {
        sqlx::query("UPDATE task_executions SET retry_count = ? WHERE id = ?")
            .bind(retry_count as i64)
            .bind(task_execution_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Finalize a task execution with its outcome
    pub async fn finish_task_execution(
        &self,
        task_execution_id: Uuid,
        status: TaskStatus,
        result: Option<&str>,
        error_message: Option<&str>,
        retry_count: u32,
    ) -> Result<DateTime<Utc>> {
        let completed_at = Utc::now();

        sqlx::query(
            r#"
            UPDATE task_executions
            SET status = ?, result = ?, error_message = ?, retry_count = ?, completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(enum_to_text(&status)?)
        .bind(result)
        .bind(error_message)
        .bind(retry_count as i64)
        .bind(timestamp_to_text(&completed_at))
        .bind(task_execution_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(completed_at)
    }

    /// Load one execution together with its task records
    pub async fn get_execution(&self, execution_id: Uuid) -> Result<Option<WorkflowExecution>> {
        let row = sqlx::query("SELECT * FROM workflow_executions WHERE id = ?")
            .bind(execution_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut execution = execution_from_row(&row)?;
        execution.task_executions = self.task_executions(execution.id).await?;
        Ok(Some(execution))
    }

    /// List executions, newest first
    pub async fn list_executions(&self, query: &ExecutionQuery) -> Result<Vec<WorkflowExecution>> {
        let status = query.status.as_ref().map(enum_to_text).transpose()?;

        let rows = sqlx::query(
            r#"
            SELECT * FROM workflow_executions
            WHERE (?1 IS NULL OR workflow_id = ?1)
              AND (?2 IS NULL OR status = ?2)
            ORDER BY created_at DESC
            LIMIT ?3
            "#,
        )
        .bind(query.workflow_id.map(|id| id.to_string()))
        .bind(status)
        .bind(query.limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut executions = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut execution = execution_from_row(row)?;
            execution.task_executions = self.task_executions(execution.id).await?;
            executions.push(execution);
        }

        Ok(executions)
    }

    async fn task_executions(&self, execution_id: Uuid) -> Result<Vec<TaskExecution>> {
        let rows = sqlx::query(
            "SELECT * FROM task_executions WHERE execution_id = ? ORDER BY COALESCE(started_at, completed_at), rowid",
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(task_execution_from_row).collect()
    }
}

fn optional_timestamp(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.try_get(column)?;
    raw.as_deref().map(timestamp_from_text).transpose()
}

fn execution_from_row(row: &SqliteRow) -> Result<WorkflowExecution> {
    let id: String = row.try_get("id")?;
    let workflow_id: String = row.try_get("workflow_id")?;
    let status: String = row.try_get("status")?;
    let trigger_type: String = row.try_get("trigger_type")?;
    let input: Option<String> = row.try_get("input")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(WorkflowExecution {
        id: Uuid::parse_str(&id)?,
        workflow_id: Uuid::parse_str(&workflow_id)?,
        status: enum_from_text::<ExecutionStatus>(&status)?,
        task_executions: Vec::new(),
        trigger_type: enum_from_text::<TriggerType>(&trigger_type)?,
        triggered_by: row.try_get("triggered_by")?,
        input: input.as_deref().map(serde_json::from_str).transpose()?,
        error_message: row.try_get("error_message")?,
        created_at: timestamp_from_text(&created_at)?,
        started_at: optional_timestamp(row, "started_at")?,
        completed_at: optional_timestamp(row, "completed_at")?,
    })
}

fn task_execution_from_row(row: &SqliteRow) -> Result<TaskExecution> {
    let id: String = row.try_get("id")?;
    let execution_id: String = row.try_get("execution_id")?;
    let status: String = row.try_get("status")?;

    Ok(TaskExecution {
        id: Uuid::parse_str(&id)?,
        execution_id: Uuid::parse_str(&execution_id)?,
        task_id: row.try_get("task_id")?,
        task_name: row.try_get("task_name")?,
        status: enum_from_text::<TaskStatus>(&status)?,
        result: row.try_get("result")?,
        error_message: row.try_get("error_message")?,
        retry_count: row.try_get::<i64, _>("retry_count")?.max(0) as u32,
        started_at: optional_timestamp(row, "started_at")?,
        completed_at: optional_timestamp(row, "completed_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::workflow::types::{TaskType, WorkflowTask};
    use serde_json::{json, Map};

    async fn history() -> ExecutionHistory {
        let pool = crate::database::connect(&DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        })
        .await
        .unwrap();
        ExecutionHistory::new(pool)
    }

    fn task(id: &str) -> WorkflowTask {
        WorkflowTask {
            id: id.to_string(),
            name: id.to_uppercase(),
            task_type: TaskType::Delay,
            config: Map::new(),
            depends_on: vec![],
            timeout_seconds: None,
            continue_on_error: false,
        }
    }

    #[tokio::test]
    async fn first_terminal_status_wins() {
        let history = history().await;
        let execution = WorkflowExecution::pending(Uuid::new_v4(), TriggerType::Manual, Some("ops".into()), None);
        history.create_execution(&execution).await.unwrap();

        assert!(history.mark_running(execution.id).await.unwrap());
        assert!(!history.mark_running(execution.id).await.unwrap());

        assert!(history
            .finish_execution(execution.id, ExecutionStatus::Cancelled, Some("cancelled by user"))
            .await
            .unwrap());
        assert!(!history
            .finish_execution(execution.id, ExecutionStatus::Completed, None)
            .await
            .unwrap());

        let stored = history.get_execution(execution.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Cancelled);
        assert_eq!(stored.error_message.as_deref(), Some("cancelled by user"));
        assert!(stored.started_at.is_some());
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn task_records_are_attached_in_dispatch_order() {
        let history = history().await;
        let execution = WorkflowExecution::pending(Uuid::new_v4(), TriggerType::Api, None, Some(json!({ "site": "north" })));
        history.create_execution(&execution).await.unwrap();

        let first = TaskExecution::running(execution.id, &task("first"));
        history.insert_task_execution(&first).await.unwrap();
        history.record_retry(first.id, 1).await.unwrap();
        history
            .finish_task_execution(first.id, TaskStatus::Completed, Some("{\"ok\":true}"), None, 1)
            .await
            .unwrap();

        let second = TaskExecution::skipped(execution.id, &task("second"), "condition false".into());
        history.insert_task_execution(&second).await.unwrap();

        let stored = history.get_execution(execution.id).await.unwrap().unwrap();
        assert_eq!(stored.input, Some(json!({ "site": "north" })));
        assert_eq!(stored.task_executions.len(), 2);
        assert_eq!(stored.task_executions[0].task_id, "first");
        assert_eq!(stored.task_executions[0].retry_count, 1);
        assert_eq!(stored.task_executions[0].status, TaskStatus::Completed);
        assert_eq!(stored.task_executions[1].status, TaskStatus::Skipped);
    }

    #[tokio::test]
    async fn list_filters_by_workflow_and_status() {
        let history = history().await;
        let workflow_a = Uuid::new_v4();
        let workflow_b = Uuid::new_v4();

        for workflow_id in [workflow_a, workflow_a, workflow_b] {
            let execution = WorkflowExecution::pending(workflow_id, TriggerType::Scheduled, None, None);
            history.create_execution(&execution).await.unwrap();
        }

        let all = history
            .list_executions(&ExecutionQuery { limit: 50, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let only_a = history
            .list_executions(&ExecutionQuery {
                workflow_id: Some(workflow_a),
                limit: 50,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(only_a.len(), 2);

        let limited = history
            .list_executions(&ExecutionQuery { limit: 1, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);

        let running = history
            .list_executions(&ExecutionQuery {
                status: Some(ExecutionStatus::Running),
                limit: 50,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(running.is_empty());
    }

    #[tokio::test]
    async fn interrupted_executions_are_failed_on_startup() {
        let history = history().await;
        let execution = WorkflowExecution::pending(Uuid::new_v4(), TriggerType::Manual, None, None);
        history.create_execution(&execution).await.unwrap();
        history.mark_running(execution.id).await.unwrap();
        let in_flight = TaskExecution::running(execution.id, &task("slow"));
        history.insert_task_execution(&in_flight).await.unwrap();

        assert_eq!(history.fail_interrupted("Interrupted by service restart").await.unwrap(), 1);

        let stored = history.get_execution(execution.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Failed);
        assert_eq!(stored.task_executions[0].status, TaskStatus::Abandoned);
    }
}
