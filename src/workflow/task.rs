/// Typed task configuration
///
/// A task's `config` travels as a free-form JSON object. Before anything runs,
/// it is parsed into a [`TaskKind`], which carries one payload shape per task
/// type. The validator and the execution planner both go through
/// [`TaskKind::parse`], so handlers never inspect raw maps.

use crate::workflow::types::{TaskType, WorkflowTask};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// Parsed, handler-ready task configuration
#[derive(Debug, Clone, PartialEq)]
pub enum TaskKind {
    HttpCall(HttpRequestConfig),
    Delay(DelayConfig),
    Condition(ConditionConfig),
    Transform(TransformConfig),
    Notification(NotificationConfig),
    Forecast(HttpRequestConfig),
    Optimization(HttpRequestConfig),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "PATCH" => Some(Self::Patch),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

/// HttpCall, Forecast and Optimization share this payload
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequestConfig {
    pub url: String,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DelayConfig {
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionConfig {
    /// JSONPath evaluated against the execution document
    pub expression: String,
    /// When set, the first match must equal this value
    pub equals: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformConfig {
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationConfig {
    pub message: String,
    pub channel: String,
    /// Webhook target; the message is only logged when absent
    pub url: Option<String>,
}

impl TaskKind {
    /// Parse a task's raw config according to its declared type
    ///
    /// Returns every problem found rather than stopping at the first one.
    /// Messages describe the field only; callers prefix them with the task id.
    pub fn parse(task_type: TaskType, config: &Map<String, Value>) -> Result<Self, Vec<String>> {
        let mut errors = Vec::new();

        let kind = match task_type {
            TaskType::HttpCall => parse_http_request(config, HttpMethod::Get, &mut errors).map(Self::HttpCall),
            TaskType::Forecast => parse_http_request(config, HttpMethod::Post, &mut errors).map(Self::Forecast),
            TaskType::Optimization => {
                parse_http_request(config, HttpMethod::Post, &mut errors).map(Self::Optimization)
            }
            TaskType::Delay => parse_delay(config, &mut errors).map(Self::Delay),
            TaskType::Condition => {
                let expression = required_expression(config, &mut errors);
                expression.map(|expression| {
                    Self::Condition(ConditionConfig {
                        expression,
                        equals: config.get("equals").cloned(),
                    })
                })
            }
            TaskType::Transform => {
                required_expression(config, &mut errors).map(|expression| Self::Transform(TransformConfig { expression }))
            }
            TaskType::Notification => parse_notification(config, &mut errors).map(Self::Notification),
        };

        match kind {
            Some(kind) if errors.is_empty() => Ok(kind),
            _ => Err(errors),
        }
    }

    /// Parse straight from a task definition
    pub fn from_task(task: &WorkflowTask) -> Result<Self, Vec<String>> {
        Self::parse(task.task_type, &task.config)
    }
}

fn required_string(config: &Map<String, Value>, key: &str, errors: &mut Vec<String>) -> Option<String> {
    match config.get(key) {
        None | Some(Value::Null) => {
            errors.push(format!("missing required config field '{}'", key));
            None
        }
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        Some(_) => {
            errors.push(format!("config field '{}' must be a non-empty string", key));
            None
        }
    }
}

fn optional_string(config: &Map<String, Value>, key: &str, errors: &mut Vec<String>) -> Option<String> {
    match config.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            errors.push(format!("config field '{}' must be a string", key));
            None
        }
    }
}

fn check_url(url: &str, key: &str, errors: &mut Vec<String>) -> bool {
    match reqwest::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => true,
        Ok(parsed) => {
            errors.push(format!("config field '{}' must use http or https, got '{}'", key, parsed.scheme()));
            false
        }
        Err(e) => {
            errors.push(format!("config field '{}' is not a valid URL: {}", key, e));
            false
        }
    }
}

fn parse_http_request(
    config: &Map<String, Value>,
    default_method: HttpMethod,
    errors: &mut Vec<String>,
) -> Option<HttpRequestConfig> {
    let url = required_string(config, "url", errors).filter(|url| check_url(url, "url", errors));

    let method = match optional_string(config, "method", errors) {
        Some(raw) => HttpMethod::parse(&raw).or_else(|| {
            errors.push(format!("unsupported HTTP method '{}'", raw));
            None
        }),
        None => Some(default_method),
    };

    let mut headers = BTreeMap::new();
    match config.get("headers") {
        None | Some(Value::Null) => {}
        Some(Value::Object(map)) => {
            for (name, value) in map {
                match value.as_str() {
                    Some(v) => {
                        headers.insert(name.clone(), v.to_string());
                    }
                    None => errors.push(format!("header '{}' must be a string", name)),
                }
            }
        }
        Some(_) => errors.push("config field 'headers' must be an object".to_string()),
    }

    Some(HttpRequestConfig {
        url: url?,
        method: method?,
        headers,
        body: config.get("body").filter(|body| !body.is_null()).cloned(),
    })
}

fn parse_delay(config: &Map<String, Value>, errors: &mut Vec<String>) -> Option<DelayConfig> {
    match config.get("seconds") {
        None | Some(Value::Null) => {
            errors.push("missing required config field 'seconds'".to_string());
            None
        }
        Some(value) => match value.as_f64() {
            Some(seconds) if seconds >= 0.0 && seconds.is_finite() => match Duration::try_from_secs_f64(seconds) {
                Ok(duration) => Some(DelayConfig { duration }),
                Err(_) => {
                    errors.push("config field 'seconds' is out of range".to_string());
                    None
                }
            },
            _ => {
                errors.push("config field 'seconds' must be a non-negative number".to_string());
                None
            }
        },
    }
}

fn required_expression(config: &Map<String, Value>, errors: &mut Vec<String>) -> Option<String> {
    let expression = required_string(config, "expression", errors)?;
    // Compile against an empty document; only syntax errors surface here
    if let Err(e) = jsonpath_lib::select(&Value::Object(Map::new()), &expression) {
        errors.push(format!("config field 'expression' is not a valid JSONPath: {:?}", e));
        return None;
    }
    Some(expression)
}

fn parse_notification(config: &Map<String, Value>, errors: &mut Vec<String>) -> Option<NotificationConfig> {
    let message = required_string(config, "message", errors);
    let channel = optional_string(config, "channel", errors).unwrap_or_else(|| "log".to_string());
    let url = optional_string(config, "url", errors);
    if let Some(url) = &url {
        check_url(url, "url", errors);
    }

    Some(NotificationConfig {
        message: message?,
        channel,
        url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn http_call_defaults_to_get() {
        let kind = TaskKind::parse(TaskType::HttpCall, &config(json!({ "url": "http://ingest.local/series" }))).unwrap();
        match kind {
            TaskKind::HttpCall(req) => {
                assert_eq!(req.method, HttpMethod::Get);
                assert_eq!(req.url, "http://ingest.local/series");
                assert!(req.body.is_none());
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn forecast_defaults_to_post_and_keeps_body() {
        let kind = TaskKind::parse(
            TaskType::Forecast,
            &config(json!({ "url": "http://forecast.local/run", "body": { "horizon": 24 } })),
        )
        .unwrap();
        match kind {
            TaskKind::Forecast(req) => {
                assert_eq!(req.method, HttpMethod::Post);
                assert_eq!(req.body, Some(json!({ "horizon": 24 })));
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn http_call_without_url_is_rejected() {
        let errors = TaskKind::parse(TaskType::HttpCall, &config(json!({ "method": "POST" }))).unwrap_err();
        assert_eq!(errors, vec!["missing required config field 'url'".to_string()]);
    }

    #[test]
    fn http_call_reports_every_problem() {
        let errors = TaskKind::parse(
            TaskType::HttpCall,
            &config(json!({ "url": "ftp://files.local", "method": "TRACE", "headers": { "x-n": 1 } })),
        )
        .unwrap_err();
        assert_eq!(errors.len(), 3, "{:?}", errors);
    }

    #[test]
    fn delay_requires_non_negative_seconds() {
        assert!(TaskKind::parse(TaskType::Delay, &config(json!({}))).is_err());
        assert!(TaskKind::parse(TaskType::Delay, &config(json!({ "seconds": -1 }))).is_err());
        assert!(TaskKind::parse(TaskType::Delay, &config(json!({ "seconds": "5" }))).is_err());

        let kind = TaskKind::parse(TaskType::Delay, &config(json!({ "seconds": 1.5 }))).unwrap();
        assert_eq!(
            kind,
            TaskKind::Delay(DelayConfig {
                duration: Duration::from_millis(1500)
            })
        );
    }

    #[test]
    fn delay_beyond_duration_range_is_an_error() {
        let errors = TaskKind::parse(TaskType::Delay, &config(json!({ "seconds": 1e30 }))).unwrap_err();
        assert_eq!(errors, vec!["config field 'seconds' is out of range".to_string()]);
    }

    #[test]
    fn condition_keeps_expected_value() {
        let kind = TaskKind::parse(
            TaskType::Condition,
            &config(json!({ "expression": "$.tasks.fetch.status", "equals": 200 })),
        )
        .unwrap();
        assert_eq!(
            kind,
            TaskKind::Condition(ConditionConfig {
                expression: "$.tasks.fetch.status".to_string(),
                equals: Some(json!(200)),
            })
        );
    }

    #[test]
    fn transform_requires_expression() {
        let errors = TaskKind::parse(TaskType::Transform, &config(json!({}))).unwrap_err();
        assert_eq!(errors, vec!["missing required config field 'expression'".to_string()]);
    }

    #[test]
    fn notification_defaults_to_log_channel() {
        let kind = TaskKind::parse(TaskType::Notification, &config(json!({ "message": "plan ready" }))).unwrap();
        assert_eq!(
            kind,
            TaskKind::Notification(NotificationConfig {
                message: "plan ready".to_string(),
                channel: "log".to_string(),
                url: None,
            })
        );
    }
}
