/// SQLite connection management and schema setup
///
/// One pool serves all three tables: workflow definitions, executions and
/// task executions. Nested structures (tasks, schedule, tags, execution input)
/// are stored as JSON text columns.

use crate::config::DatabaseConfig;
use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

/// Open the configured SQLite database and make sure the schema exists
///
/// File databases get their parent directory created on demand. In-memory
/// databases are pinned to a single connection, since every SQLite memory
/// connection is its own database.
pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool> {
    let in_memory = config.url.contains(":memory:");

    let options = SqliteConnectOptions::from_str(&config.url)
        .map_err(|e| anyhow::anyhow!("Invalid database URL '{}': {}", config.url, e))?
        .create_if_missing(true)
        .foreign_keys(true);

    if !in_memory {
        let path = options.get_filename();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| anyhow::anyhow!("Failed to create database directory '{}': {}", parent.display(), e))?;
        }
    }

    let max_connections = if in_memory { 1 } else { config.max_connections.max(1) };
    tracing::info!("🗄️ Opening database pool: {} ({} connections)", config.url, max_connections);

    let mut pool_options = SqlitePoolOptions::new().max_connections(max_connections);
    if in_memory {
        // Closing the only connection would drop the database
        pool_options = pool_options.idle_timeout(None).max_lifetime(None);
    }
    let pool = pool_options.connect_with(options).await?;

    init_schema(&pool).await?;

    tracing::info!("✅ Database ready: {}", config.url);
    Ok(pool)
}

/// Create tables and indexes
///
/// Safe to call multiple times (uses IF NOT EXISTS).
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workflow_definitions (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            tasks TEXT NOT NULL,
            schedule TEXT,
            enabled INTEGER NOT NULL DEFAULT 1,
            max_execution_time_seconds INTEGER NOT NULL,
            max_retries INTEGER NOT NULL DEFAULT 0,
            tags TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workflow_executions (
            id TEXT PRIMARY KEY,
            workflow_id TEXT NOT NULL,
            status TEXT NOT NULL,
            trigger_type TEXT NOT NULL,
            triggered_by TEXT,
            input TEXT,
            error_message TEXT,
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task_executions (
            id TEXT PRIMARY KEY,
            execution_id TEXT NOT NULL REFERENCES workflow_executions(id) ON DELETE CASCADE,
            task_id TEXT NOT NULL,
            task_name TEXT NOT NULL,
            status TEXT NOT NULL,
            result TEXT,
            error_message TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            started_at TEXT,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_workflow_definitions_name ON workflow_definitions(name)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_workflow_executions_workflow ON workflow_executions(workflow_id, created_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_workflow_executions_status ON workflow_executions(status)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_task_executions_execution ON task_executions(execution_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Fixed-width RFC 3339 so TEXT columns sort chronologically
pub(crate) fn timestamp_to_text(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn timestamp_from_text(text: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(text)
        .map_err(|e| anyhow::anyhow!("Invalid stored timestamp '{}': {}", text, e))?
        .with_timezone(&Utc))
}

/// Store a serde unit-variant enum as its bare name, e.g. `Running`
pub(crate) fn enum_to_text<T: serde::Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(anyhow::anyhow!("Expected a string-like enum, got {}", other)),
    }
}

/// Inverse of [`enum_to_text`]
pub(crate) fn enum_from_text<T: serde::de::DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(text.to_string()))
        .map_err(|e| anyhow::anyhow!("Unknown stored value '{}': {}", text, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::ExecutionStatus;
    use chrono::Timelike;

    #[tokio::test]
    async fn in_memory_schema_is_idempotent() {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 8,
        };
        let pool = connect(&config).await.unwrap();
        init_schema(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM workflow_definitions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn enums_round_trip_as_bare_names() {
        let text = enum_to_text(&ExecutionStatus::TimedOut).unwrap();
        assert_eq!(text, "TimedOut");
        let status: ExecutionStatus = enum_from_text(&text).unwrap();
        assert_eq!(status, ExecutionStatus::TimedOut);
        assert!(enum_from_text::<ExecutionStatus>("Exploded").is_err());
    }

    #[test]
    fn timestamps_sort_as_text() {
        let earlier = Utc::now();
        let later = earlier + chrono::Duration::milliseconds(1500);
        let (a, b) = (timestamp_to_text(&earlier), timestamp_to_text(&later));
        assert!(a < b);
        assert_eq!(a.len(), b.len());
        assert_eq!(timestamp_from_text(&a).unwrap(), earlier.with_nanosecond(earlier.nanosecond() / 1000 * 1000).unwrap());
    }
}
