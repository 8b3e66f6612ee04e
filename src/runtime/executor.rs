/// Task execution handlers
///
/// Contains the execution logic for each task kind:
/// - HttpCall / Forecast / Optimization: outbound HTTP via reqwest
/// - Delay: timed sleep
/// - Condition / Transform: JSONPath over the execution document
/// - Notification: log line or webhook post
///
/// Handlers know nothing about timeouts, retries or cancellation. The engine
/// wraps every call with those.

use crate::error::TaskError;
use crate::workflow::task::{
    ConditionConfig, HttpMethod, HttpRequestConfig, NotificationConfig, TaskKind, TransformConfig,
};
use crate::workflow::types::WorkflowTask;
use anyhow::Result;
use serde_json::{json, Value};
use std::{collections::HashMap, time::Duration};
use uuid::Uuid;

/// Read-only view a task runs against
///
/// `document` has the shape `{ "input": ..., "tasks": { "<taskId>": <output> } }`
/// and only contains outputs of tasks that already completed.
#[derive(Debug, Clone, Copy)]
pub struct TaskContext<'a> {
    pub workflow_id: Uuid,
    pub execution_id: Uuid,
    pub document: &'a Value,
}

/// Result of executing a single task
#[derive(Debug, Clone)]
pub struct TaskOutput {
    /// JSON output, stored on the task execution and exposed to later tasks
    pub value: Value,
    /// Whether dependents of this task should run
    pub should_continue: bool,
}

impl TaskOutput {
    fn proceed(value: Value) -> Self {
        Self {
            value,
            should_continue: true,
        }
    }
}

/// Task executor that dispatches to the handler for each task kind
///
/// Holds one pooled HTTP client shared by every execution.
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    client: reqwest::Client,
}

impl TaskExecutor {
    /// Create a task executor whose HTTP requests are capped at `http_timeout`
    pub fn new(http_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(http_timeout)
            .user_agent(concat!("gridflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self { client })
    }

    /// Execute one attempt of a task
    pub async fn execute_task(
        &self,
        task: &WorkflowTask,
        kind: &TaskKind,
        context: TaskContext<'_>,
    ) -> Result<TaskOutput, TaskError> {
        tracing::info!("🚀 Starting task execution: {} (type: {:?})", task.id, task.task_type);
        let start_time = std::time::Instant::now();

        let result = match kind {
            TaskKind::HttpCall(request) | TaskKind::Forecast(request) | TaskKind::Optimization(request) => {
                self.execute_http_request(request).await
            }
            TaskKind::Delay(delay) => {
                tracing::debug!("⏳ Delaying task '{}' for {:?}", task.id, delay.duration);
                tokio::time::sleep(delay.duration).await;
                Ok(TaskOutput::proceed(json!({ "delayedMs": delay.duration.as_millis() as u64 })))
            }
            TaskKind::Condition(condition) => evaluate_condition(condition, context.document),
            TaskKind::Transform(transform) => evaluate_transform(transform, context.document),
            TaskKind::Notification(notification) => self.execute_notification(notification, context).await,
        };

        let duration = start_time.elapsed();
        match &result {
            Ok(output) => {
                tracing::info!("✅ Task execution completed: {} in {:?}", task.id, duration);
                tracing::debug!("📤 Output: {}", output.value);
            }
            Err(e) => {
                tracing::warn!("❌ Task execution failed: {} in {:?} - Error: {}", task.id, duration, e);
            }
        }

        result
    }

    /// Send an HTTP request described by the task config
    ///
    /// The response body is parsed as JSON when possible, otherwise kept as text.
    /// Non-2xx responses fail the task.
    async fn execute_http_request(&self, request: &HttpRequestConfig) -> Result<TaskOutput, TaskError> {
        tracing::debug!("🌍 HTTP Request: {} {}", request.method.as_str(), request.url);

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
            HttpMethod::Put => self.client.put(&request.url),
            HttpMethod::Patch => self.client.patch(&request.url),
            HttpMethod::Delete => self.client.delete(&request.url),
        };

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(body) = &request.body {
            builder = match body {
                Value::String(text) => builder.header("Content-Type", "text/plain").body(text.clone()),
                other => builder.json(other),
            };
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();

        tracing::debug!("📡 Response status: {}", status);

        let text = response.text().await?;
        if !status.is_success() {
            return Err(TaskError::HttpStatus {
                method: request.method.as_str(),
                url: request.url.clone(),
                status: status.as_u16(),
            });
        }

        let data = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        Ok(TaskOutput::proceed(json!({
            "status": status.as_u16(),
            "headers": headers,
            "data": data,
            "success": true
        })))
    }

    async fn execute_notification(
        &self,
        notification: &NotificationConfig,
        context: TaskContext<'_>,
    ) -> Result<TaskOutput, TaskError> {
        let Some(url) = &notification.url else {
            tracing::info!(
                target: "gridflow::notifications",
                channel = %notification.channel,
                workflow_id = %context.workflow_id,
                execution_id = %context.execution_id,
                "📣 {}",
                notification.message
            );
            return Ok(TaskOutput::proceed(json!({
                "delivered": true,
                "channel": notification.channel
            })));
        };

        let payload = json!({
            "channel": notification.channel,
            "message": notification.message,
            "workflowId": context.workflow_id,
            "executionId": context.execution_id,
        });

        let response = self.client.post(url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TaskError::HttpStatus {
                method: "POST",
                url: url.clone(),
                status: status.as_u16(),
            });
        }

        Ok(TaskOutput::proceed(json!({
            "delivered": true,
            "channel": notification.channel,
            "status": status.as_u16()
        })))
    }
}

fn select<'a>(document: &'a Value, expression: &str) -> Result<Vec<&'a Value>, TaskError> {
    jsonpath_lib::select(document, expression).map_err(|e| TaskError::Expression(format!("{:?}", e)))
}

/// True when the selection is non-empty and, if `equals` is set, the first match equals it
fn evaluate_condition(condition: &ConditionConfig, document: &Value) -> Result<TaskOutput, TaskError> {
    let matches = select(document, &condition.expression)?;

    let result = match (&condition.equals, matches.first()) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(expected), Some(first)) => *first == expected,
    };

    tracing::debug!("🔀 Condition '{}' evaluated to {}", condition.expression, result);

    Ok(TaskOutput {
        value: json!({
            "result": result,
            "matches": matches,
        }),
        should_continue: result,
    })
}

fn evaluate_transform(transform: &TransformConfig, document: &Value) -> Result<TaskOutput, TaskError> {
    let mut matches = select(document, &transform.expression)?;

    let value = match matches.len() {
        0 => Value::Null,
        1 => matches.remove(0).clone(),
        _ => Value::Array(matches.into_iter().cloned().collect()),
    };

    Ok(TaskOutput::proceed(value))
}
