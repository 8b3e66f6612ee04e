/// Background scheduler service
///
/// Owns one tokio-cron-scheduler job per schedulable workflow. Cron schedules
/// become cron jobs, interval schedules become repeated jobs. Every fire goes
/// through [`WorkflowEngine::trigger`], so scheduled runs get the same
/// validation, concurrency limit and history as API runs.

use crate::error::EngineError;
use crate::runtime::engine::WorkflowEngine;
use crate::workflow::storage::WorkflowStorage;
use crate::workflow::types::{ScheduleType, TriggerType, WorkflowDefinition, WorkflowExecution, WorkflowSchedule};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

/// Snapshot of one registered job
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledJob {
    pub workflow_id: Uuid,
    pub workflow_name: String,
    pub schedule_type: ScheduleType,
    pub cron_expression: Option<String>,
    pub interval_seconds: Option<u64>,
    pub timezone: String,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub previous_fire_time: Option<DateTime<Utc>>,
}

/// Scheduler status summary
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerInfo {
    pub running: bool,
    pub job_count: usize,
    pub running_executions: usize,
    pub max_concurrent_executions: usize,
    pub started_at: Option<DateTime<Utc>>,
}

/// Scheduling operations used by the API layer
#[async_trait]
pub trait WorkflowScheduler: Send + Sync {
    /// Register every schedulable workflow and start firing jobs
    async fn start(&self) -> Result<(), EngineError>;

    /// Stop firing and drop every job
    async fn shutdown(&self) -> Result<(), EngineError>;

    /// Replace the job of a workflow
    ///
    /// Returns false, leaving no job behind, when the workflow is disabled or
    /// has no cron or interval schedule.
    async fn register(&self, workflow: &WorkflowDefinition) -> Result<bool, EngineError>;

    /// Remove the job of a workflow. Returns false if there was none.
    async fn unregister(&self, workflow_id: Uuid) -> Result<bool, EngineError>;

    async fn list_jobs(&self) -> Vec<ScheduledJob>;

    /// Run a scheduled workflow immediately, outside its schedule
    async fn trigger_now(&self, workflow_id: Uuid) -> Result<WorkflowExecution, EngineError>;

    async fn info(&self) -> SchedulerInfo;
}

/// Book-keeping for a registered job
#[derive(Debug, Clone)]
struct JobEntry {
    job_id: Uuid,
    workflow_name: String,
    schedule: WorkflowSchedule,
    previous_fire: Arc<RwLock<Option<DateTime<Utc>>>>,
}

/// Everything a fired job needs, shared by all of its fires
struct FireContext {
    workflow_id: Uuid,
    start_at: Option<DateTime<Utc>>,
    end_at: Option<DateTime<Utc>>,
    engine: Arc<WorkflowEngine>,
    previous_fire: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl FireContext {
    async fn fire(&self) {
        let now = Utc::now();
        if !within_window(now, self.start_at, self.end_at) {
            tracing::debug!("⏭️ Ignoring fire for workflow {} outside its active window", self.workflow_id);
            return;
        }

        *self.previous_fire.write().await = Some(now);
        tracing::debug!("🔔 Schedule fired for workflow {}", self.workflow_id);

        match self
            .engine
            .trigger(self.workflow_id, TriggerType::Scheduled, Some("scheduler".to_string()), None)
            .await
        {
            Ok(execution) => {
                tracing::info!("🚀 Scheduled execution {} started for workflow {}", execution.id, self.workflow_id)
            }
            Err(e) => tracing::error!("❌ Scheduled trigger failed for workflow {}: {}", self.workflow_id, e),
        }
    }
}

type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

fn job_runner(context: Arc<FireContext>) -> impl FnMut(Uuid, JobScheduler) -> JobFuture + Send + Sync + 'static {
    move |_uuid, _scheduler| {
        let context = Arc::clone(&context);
        Box::pin(async move { context.fire().await })
    }
}

/// Whether `now` lies inside the optional `[start_at, end_at]` window
fn within_window(now: DateTime<Utc>, start_at: Option<DateTime<Utc>>, end_at: Option<DateTime<Utc>>) -> bool {
    start_at.map_or(true, |start| now >= start) && end_at.map_or(true, |end| now <= end)
}

/// tokio-cron-scheduler backed implementation of [`WorkflowScheduler`]
pub struct CronSchedulerService {
    scheduler: Arc<RwLock<JobScheduler>>,
    /// Workflow id to its job
    jobs: Arc<RwLock<HashMap<Uuid, JobEntry>>>,
    storage: WorkflowStorage,
    engine: Arc<WorkflowEngine>,
    started_at: RwLock<Option<DateTime<Utc>>>,
}

impl CronSchedulerService {
    pub async fn new(storage: WorkflowStorage, engine: Arc<WorkflowEngine>) -> Result<Self, EngineError> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            jobs: Arc::new(RwLock::new(HashMap::new())),
            storage,
            engine,
            started_at: RwLock::new(None),
        })
    }

    /// Register all enabled timed workflows from storage
    async fn register_all(&self) -> Result<usize, EngineError> {
        let workflows = self.storage.list_schedulable().await?;
        let mut registered = 0;

        for workflow in &workflows {
            match self.register(workflow).await {
                Ok(true) => registered += 1,
                Ok(false) => {}
                Err(e) => tracing::error!("❌ Could not schedule workflow '{}': {}", workflow.name, e),
            }
        }

        tracing::info!("📊 Registered {} scheduled workflow(s)", registered);
        Ok(registered)
    }

    fn build_job(&self, workflow: &WorkflowDefinition, schedule: &WorkflowSchedule, context: Arc<FireContext>) -> Result<Job, EngineError> {
        let job = match schedule.schedule_type {
            ScheduleType::Cron => {
                let expression = schedule.cron_expression.as_deref().ok_or_else(|| {
                    EngineError::InvalidWorkflow(vec!["Cron schedule requires a cronExpression".to_string()])
                })?;
                let tz = schedule.tz().ok_or_else(|| {
                    EngineError::InvalidWorkflow(vec![format!("Unknown timezone '{}'", schedule.timezone)])
                })?;
                tracing::info!("⏰ Scheduling '{}' with cron '{}' ({})", workflow.name, expression, tz);
                Job::new_async_tz(expression, tz, job_runner(context))?
            }
            ScheduleType::Interval => {
                let seconds = schedule.interval_seconds.filter(|s| *s > 0).ok_or_else(|| {
                    EngineError::InvalidWorkflow(vec!["Interval schedule requires intervalSeconds > 0".to_string()])
                })?;
                tracing::info!("⏰ Scheduling '{}' every {}s", workflow.name, seconds);
                Job::new_repeated_async(Duration::from_secs(seconds), job_runner(context))?
            }
            ScheduleType::Webhook | ScheduleType::Manual => {
                return Err(EngineError::Scheduler(format!(
                    "{:?} schedules are not driven by the scheduler",
                    schedule.schedule_type
                )))
            }
        };

        Ok(job)
    }

    /// Drop a job from the underlying scheduler
    async fn remove_job(&self, entry: &JobEntry) {
        let scheduler = self.scheduler.read().await;
        if let Err(e) = scheduler.remove(&entry.job_id).await {
            tracing::warn!("⚠️ Failed to remove job {} from scheduler: {}", entry.job_id, e);
        } else {
            tracing::info!("🗑️ Removed schedule of workflow '{}'", entry.workflow_name);
        }
    }
}

#[async_trait]
impl WorkflowScheduler for CronSchedulerService {
    async fn start(&self) -> Result<(), EngineError> {
        if self.started_at.read().await.is_some() {
            return Ok(());
        }

        tracing::info!("⏰ Starting workflow scheduler");
        self.register_all().await?;

        {
            let scheduler = self.scheduler.read().await;
            scheduler.start().await?;
        }

        *self.started_at.write().await = Some(Utc::now());
        tracing::info!("✅ Workflow scheduler started");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), EngineError> {
        tracing::info!("⏹️ Stopping workflow scheduler");

        {
            let mut jobs = self.jobs.write().await;
            jobs.clear();
        }

        {
            let mut scheduler = self.scheduler.write().await;
            scheduler.shutdown().await?;
        }

        *self.started_at.write().await = None;
        tracing::info!("✅ Workflow scheduler stopped");
        Ok(())
    }

    async fn register(&self, workflow: &WorkflowDefinition) -> Result<bool, EngineError> {
        // Held across remove, add and insert: one job per workflow
        let mut jobs = self.jobs.write().await;

        if let Some(entry) = jobs.remove(&workflow.id) {
            self.remove_job(&entry).await;
        }

        let Some(schedule) = workflow.schedule.as_ref().filter(|_| workflow.is_schedulable()) else {
            tracing::debug!("📋 Workflow '{}' has no active timed schedule", workflow.name);
            return Ok(false);
        };

        let previous_fire = Arc::new(RwLock::new(None));
        let context = Arc::new(FireContext {
            workflow_id: workflow.id,
            start_at: schedule.start_at,
            end_at: schedule.end_at,
            engine: Arc::clone(&self.engine),
            previous_fire: Arc::clone(&previous_fire),
        });

        let job = self.build_job(workflow, schedule, context)?;
        let job_id = {
            let scheduler = self.scheduler.write().await;
            scheduler.add(job).await?
        };

        jobs.insert(
            workflow.id,
            JobEntry {
                job_id,
                workflow_name: workflow.name.clone(),
                schedule: schedule.clone(),
                previous_fire,
            },
        );

        tracing::debug!("📝 Tracked job {} for workflow '{}'", job_id, workflow.name);
        Ok(true)
    }

    async fn unregister(&self, workflow_id: Uuid) -> Result<bool, EngineError> {
        let mut jobs = self.jobs.write().await;
        let Some(entry) = jobs.remove(&workflow_id) else {
            return Ok(false);
        };

        self.remove_job(&entry).await;
        Ok(true)
    }

    async fn list_jobs(&self) -> Vec<ScheduledJob> {
        let entries: Vec<(Uuid, JobEntry)> = self
            .jobs
            .read()
            .await
            .iter()
            .map(|(id, entry)| (*id, entry.clone()))
            .collect();

        let mut jobs = Vec::with_capacity(entries.len());
        for (workflow_id, entry) in entries {
            let next_fire_time = {
                let mut scheduler = self.scheduler.write().await;
                scheduler.next_tick_for_job(entry.job_id).await.ok().flatten()
            };

            jobs.push(ScheduledJob {
                workflow_id,
                workflow_name: entry.workflow_name,
                schedule_type: entry.schedule.schedule_type,
                cron_expression: entry.schedule.cron_expression,
                interval_seconds: entry.schedule.interval_seconds,
                timezone: entry.schedule.timezone,
                next_fire_time,
                previous_fire_time: *entry.previous_fire.read().await,
            });
        }

        jobs.sort_by(|a, b| a.workflow_name.cmp(&b.workflow_name));
        jobs
    }

    async fn trigger_now(&self, workflow_id: Uuid) -> Result<WorkflowExecution, EngineError> {
        if !self.jobs.read().await.contains_key(&workflow_id) {
            return Err(EngineError::JobNotFound(workflow_id));
        }

        self.engine
            .trigger(workflow_id, TriggerType::Api, Some("scheduler".to_string()), None)
            .await
    }

    async fn info(&self) -> SchedulerInfo {
        let started_at = *self.started_at.read().await;

        SchedulerInfo {
            running: started_at.is_some(),
            job_count: self.jobs.read().await.len(),
            running_executions: self.engine.running_count().await,
            max_concurrent_executions: self.engine.max_concurrent_executions(),
            started_at,
        }
    }
}
