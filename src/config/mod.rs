/// Configuration management for the gridflow service
///
/// Handles server binding, the SQLite store, execution limits and scheduler
/// switches. Every value can be overridden through a `GRIDFLOW_*` environment
/// variable for container deployments.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Execution engine limits
    pub engine: EngineConfig,
    /// Cron scheduler switches
    pub scheduler: SchedulerConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// SQLite store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection URL, e.g. "sqlite://data/gridflow.db" or "sqlite::memory:"
    pub url: String,
    /// Pool size for file databases (in-memory databases always use one)
    pub max_connections: u32,
}

/// Execution engine limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Workflow executions allowed to run at the same time
    pub max_concurrent_executions: usize,
    /// Per-attempt timeout for tasks that do not set their own
    pub default_task_timeout_secs: u64,
    /// First retry delay; doubles on every further attempt
    pub retry_base_delay_ms: u64,
    /// Upper bound for a single outbound HTTP request
    pub http_timeout_secs: u64,
}

impl EngineConfig {
    pub fn default_task_timeout(&self) -> Duration {
        Duration::from_secs(self.default_task_timeout_secs)
    }

    /// Backoff before retry number `attempt` (1-based)
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(factor))
    }
}

/// Cron scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// When false, no timed jobs are registered at startup
    pub enabled: bool,
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("GRIDFLOW_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("GRIDFLOW_PORT", 3004),
            },
            database: DatabaseConfig {
                url: std::env::var("GRIDFLOW_DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/gridflow.db".to_string()),
                max_connections: env_or("GRIDFLOW_DB_MAX_CONNECTIONS", 5),
            },
            engine: EngineConfig {
                max_concurrent_executions: env_or("GRIDFLOW_MAX_CONCURRENT_EXECUTIONS", 4),
                default_task_timeout_secs: env_or("GRIDFLOW_DEFAULT_TASK_TIMEOUT_SECS", 300),
                retry_base_delay_ms: env_or("GRIDFLOW_RETRY_BASE_DELAY_MS", 1000),
                http_timeout_secs: env_or("GRIDFLOW_HTTP_TIMEOUT_SECS", 100),
            },
            scheduler: SchedulerConfig {
                enabled: env_or("GRIDFLOW_SCHEDULER_ENABLED", true),
            },
        }
    }
}

/// Read and parse an environment variable, falling back on absence or parse failure
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("⚠️ Ignoring unparsable {}={:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_doubles() {
        let engine = EngineConfig {
            max_concurrent_executions: 1,
            default_task_timeout_secs: 10,
            retry_base_delay_ms: 100,
            http_timeout_secs: 5,
        };
        assert_eq!(engine.retry_delay(1), Duration::from_millis(100));
        assert_eq!(engine.retry_delay(2), Duration::from_millis(200));
        assert_eq!(engine.retry_delay(4), Duration::from_millis(800));
    }

    #[test]
    fn env_or_falls_back_on_garbage() {
        std::env::set_var("GRIDFLOW_TEST_GARBAGE_PORT", "not-a-port");
        assert_eq!(env_or::<u16>("GRIDFLOW_TEST_GARBAGE_PORT", 3004), 3004);
        std::env::set_var("GRIDFLOW_TEST_GOOD_PORT", " 8080 ");
        assert_eq!(env_or::<u16>("GRIDFLOW_TEST_GOOD_PORT", 3004), 8080);
        assert!(env_or("GRIDFLOW_TEST_UNSET_FLAG", true));
    }
}
