/// Workflow validation
///
/// Pure structural checks run before a workflow is persisted or executed:
/// task presence, dependency resolution, cycle detection and per-type config.
/// Nothing here touches storage.

use crate::workflow::task::TaskKind;
use crate::workflow::types::{ScheduleType, WorkflowDefinition, WorkflowTask, MAX_EXECUTION_TIME_LIMIT_SECS};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Outcome of validating a workflow definition
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Validate a workflow definition
///
/// Checks run in a fixed order: task presence, dependency resolution, cycles,
/// task config, then schedule. All errors are collected. Warnings never affect
/// `is_valid`.
pub fn validate(workflow: &WorkflowDefinition) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if workflow.tasks.is_empty() {
        errors.push("Workflow must contain at least one task".to_string());
    }
    if workflow.name.trim().is_empty() {
        errors.push("Workflow name is required".to_string());
    }

    let mut seen = HashSet::new();
    for task in &workflow.tasks {
        if task.id.trim().is_empty() {
            errors.push(format!("Task '{}' has an empty id", task.name));
        } else if !seen.insert(task.id.as_str()) {
            errors.push(format!("Duplicate task id '{}'", task.id));
        }
    }

    check_dependencies(&workflow.tasks, &mut errors);

    if let Some(cycle) = find_cycle(&workflow.tasks) {
        errors.push(format!("Cycle detected in task dependencies: {}", cycle.join(" -> ")));
    }

    for task in &workflow.tasks {
        if let Err(problems) = TaskKind::from_task(task) {
            errors.extend(
                problems
                    .into_iter()
                    .map(|problem| format!("Task '{}' ({:?}): {}", task.id, task.task_type, problem)),
            );
        }
        if task.timeout_seconds == Some(0) {
            errors.push(format!("Task '{}': timeoutSeconds must be greater than zero", task.id));
        }
        if let Some(timeout) = task.timeout_seconds {
            if timeout > workflow.max_execution_time_seconds {
                warnings.push(format!(
                    "Task '{}' timeout ({}s) exceeds the workflow max execution time ({}s)",
                    task.id, timeout, workflow.max_execution_time_seconds
                ));
            }
        }
    }

    if workflow.max_execution_time_seconds == 0 {
        errors.push("maxExecutionTimeSeconds must be greater than zero".to_string());
    } else if workflow.max_execution_time_seconds > MAX_EXECUTION_TIME_LIMIT_SECS {
        errors.push(format!(
            "maxExecutionTimeSeconds must not exceed {} ({}s given)",
            MAX_EXECUTION_TIME_LIMIT_SECS, workflow.max_execution_time_seconds
        ));
    }

    check_schedule(workflow, &mut errors, &mut warnings);

    ValidationResult {
        is_valid: errors.is_empty(),
        errors,
        warnings,
    }
}

fn check_dependencies(tasks: &[WorkflowTask], errors: &mut Vec<String>) {
    let ids: HashSet<&str> = tasks.iter().map(|task| task.id.as_str()).collect();

    for task in tasks {
        for dependency in &task.depends_on {
            if !ids.contains(dependency.as_str()) {
                errors.push(format!(
                    "Task '{}' depends on non-existent task '{}'",
                    task.id, dependency
                ));
            }
        }
    }
}

/// Depth-first walk over `depends_on` edges with a recursion stack
///
/// Returns the first cycle found as a path that starts and ends on the same
/// task, e.g. `["a", "b", "a"]`. Edges to unknown tasks are ignored here.
/// The walk keeps its own stack so that long chains cannot exhaust the thread.
fn find_cycle(tasks: &[WorkflowTask]) -> Option<Vec<String>> {
    let by_id: HashMap<&str, &WorkflowTask> = tasks.iter().map(|task| (task.id.as_str(), task)).collect();
    let mut visited: HashSet<&str> = HashSet::new();

    for root in tasks {
        if !visited.insert(root.id.as_str()) {
            continue;
        }

        // Each frame is a task and the index of its next dependency to visit
        let mut stack: Vec<(&str, usize)> = vec![(root.id.as_str(), 0)];
        let mut on_stack: HashSet<&str> = HashSet::from([root.id.as_str()]);

        while let Some(frame) = stack.last_mut() {
            let (id, next) = *frame;
            frame.1 += 1;

            let Some(dependency) = by_id
                .get(id)
                .copied()
                .and_then(|task| task.depends_on.get(next))
                .map(String::as_str)
            else {
                on_stack.remove(id);
                stack.pop();
                continue;
            };

            if !by_id.contains_key(dependency) {
                continue;
            }
            if on_stack.contains(dependency) {
                let start = stack.iter().position(|(on, _)| *on == dependency).unwrap_or(0);
                let mut cycle: Vec<String> = stack[start..].iter().map(|(on, _)| on.to_string()).collect();
                cycle.push(dependency.to_string());
                return Some(cycle);
            }
            if visited.insert(dependency) {
                stack.push((dependency, 0));
                on_stack.insert(dependency);
            }
        }
    }
    None
}

fn check_schedule(workflow: &WorkflowDefinition, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    let Some(schedule) = &workflow.schedule else {
        return;
    };

    match schedule.schedule_type {
        ScheduleType::Cron => match schedule.cron_expression.as_deref().map(str::trim) {
            None | Some("") => errors.push("Cron schedule requires a cronExpression".to_string()),
            Some(expr) => {
                let fields = expr.split_whitespace().count();
                if !(6..=7).contains(&fields) {
                    errors.push(format!(
                        "Cron expression '{}' must have 6 or 7 fields (sec min hour day month weekday [year]), found {}",
                        expr, fields
                    ));
                }
            }
        },
        ScheduleType::Interval => match schedule.interval_seconds {
            Some(seconds) if seconds > 0 => {}
            _ => errors.push("Interval schedule requires intervalSeconds greater than zero".to_string()),
        },
        ScheduleType::Webhook | ScheduleType::Manual => {}
    }

    if let (Some(start), Some(end)) = (schedule.start_at, schedule.end_at) {
        if start >= end {
            errors.push("Schedule startAt must be before endAt".to_string());
        }
    }

    if schedule.schedule_type.is_timed() && !workflow.enabled {
        warnings.push("Workflow is disabled; its schedule will not be registered".to_string());
    }

    if schedule.tz().is_none() {
        errors.push(format!("Unknown timezone '{}'", schedule.timezone));
    }
}
