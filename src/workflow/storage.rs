/// SQLite persistence layer for workflow definitions
///
/// Scalar fields get their own columns. Tasks, schedule and tags are stored as
/// JSON text so the nested structures round-trip without extra tables.

use crate::database::{timestamp_from_text, timestamp_to_text};
use crate::workflow::types::{WorkflowDefinition, WorkflowSchedule, WorkflowTask};
use anyhow::Result;
use sqlx::{sqlite::{SqlitePool, SqliteRow}, Row};
use uuid::Uuid;

const SELECT_COLUMNS: &str = "id, name, description, tasks, schedule, enabled, max_execution_time_seconds, \
     max_retries, tags, created_at, updated_at";

/// Workflow definition store
#[derive(Debug, Clone)]
pub struct WorkflowStorage {
    pool: SqlitePool,
}

impl WorkflowStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a workflow definition
    ///
    /// Uses UPSERT so create and update share one code path. `created_at` is
    /// never overwritten once the row exists.
    pub async fn save_workflow(&self, workflow: &WorkflowDefinition) -> Result<()> {
        let tasks_json = serde_json::to_string(&workflow.tasks)?;
        let schedule_json = workflow
            .schedule
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let tags_json = serde_json::to_string(&workflow.tags)?;
        let max_execution_time = i64::try_from(workflow.max_execution_time_seconds).map_err(|_| {
            anyhow::anyhow!(
                "maxExecutionTimeSeconds {} does not fit the store",
                workflow.max_execution_time_seconds
            )
        })?;

        sqlx::query(
            r#"
            INSERT INTO workflow_definitions
                (id, name, description, tasks, schedule, enabled, max_execution_time_seconds,
                 max_retries, tags, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                tasks = excluded.tasks,
                schedule = excluded.schedule,
                enabled = excluded.enabled,
                max_execution_time_seconds = excluded.max_execution_time_seconds,
                max_retries = excluded.max_retries,
                tags = excluded.tags,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(workflow.id.to_string())
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(&tasks_json)
        .bind(&schedule_json)
        .bind(workflow.enabled)
        .bind(max_execution_time)
        .bind(workflow.max_retries as i64)
        .bind(&tags_json)
        .bind(timestamp_to_text(&workflow.created_at))
        .bind(timestamp_to_text(&workflow.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Retrieve a workflow by ID
    pub async fn get_workflow(&self, id: Uuid) -> Result<Option<WorkflowDefinition>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM workflow_definitions WHERE id = ?",
            SELECT_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| workflow_from_row(&row)).transpose()
    }

    /// List all workflows, most recently updated first
    pub async fn list_workflows(&self) -> Result<Vec<WorkflowDefinition>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM workflow_definitions ORDER BY updated_at DESC",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(workflow_from_row).collect()
    }

    /// Workflows the scheduler should hold jobs for at startup
    pub async fn list_schedulable(&self) -> Result<Vec<WorkflowDefinition>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM workflow_definitions WHERE enabled = 1 AND schedule IS NOT NULL",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        let workflows = rows.iter().map(workflow_from_row).collect::<Result<Vec<_>>>()?;
        Ok(workflows.into_iter().filter(WorkflowDefinition::is_schedulable).collect())
    }

    /// Delete a workflow by ID
    pub async fn delete_workflow(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workflow_definitions WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn workflow_from_row(row: &SqliteRow) -> Result<WorkflowDefinition> {
    let id: String = row.try_get("id")?;
    let tasks_json: String = row.try_get("tasks")?;
    let schedule_json: Option<String> = row.try_get("schedule")?;
    let tags_json: String = row.try_get("tags")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    let tasks: Vec<WorkflowTask> = serde_json::from_str(&tasks_json)?;
    let schedule: Option<WorkflowSchedule> = schedule_json.as_deref().map(serde_json::from_str).transpose()?;

    Ok(WorkflowDefinition {
        id: Uuid::parse_str(&id)?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        tasks,
        schedule,
        enabled: row.try_get("enabled")?,
        max_execution_time_seconds: u64::try_from(row.try_get::<i64, _>("max_execution_time_seconds")?)?,
        max_retries: row.try_get::<i64, _>("max_retries")?.max(0) as u32,
        tags: serde_json::from_str(&tags_json)?,
        created_at: timestamp_from_text(&created_at)?,
        updated_at: timestamp_from_text(&updated_at)?,
    })
}
