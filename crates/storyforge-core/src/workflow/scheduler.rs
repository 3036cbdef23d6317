//! Trigger layer: cron schedules, event bindings, and manual launches.
//!
//! Wraps `tokio-cron-scheduler::JobScheduler` for calendar triggers.
//! Every firing -- scheduled, event, or manual -- records exactly one
//! entry in the rolling `ExecutionLog`, begun when the launch starts and
//! settled when it finishes.
//!
//! Scheduled triggers carry a mandatory IANA timezone; expressions are
//! normalized to 6-field cron (seconds prepended) and validated with
//! `croner` before anything is registered.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};

use storyforge_types::scheduler::{
    EventBinding, ExecutionStatus, ScheduledJob, SchedulerStatus, TriggerType,
};
use storyforge_types::workflow::{Trigger, WorkflowDefinition};

use super::log::ExecutionLog;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during trigger registration or firing.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Failed to create or manipulate a cron job.
    #[error("scheduler error: {0}")]
    JobError(String),

    /// Invalid cron expression.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Timezone is not a known IANA name.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// The named workflow was never registered.
    #[error("workflow '{0}' not registered in scheduler")]
    UnknownWorkflow(String),
}

// ---------------------------------------------------------------------------
// Launch port
// ---------------------------------------------------------------------------

/// Report from a launch that ran to a conclusion. A run can finish and
/// still report failure; `errors` collects what went wrong, and the log
/// entry records the first of them.
#[derive(Debug, Clone, Default)]
pub struct LaunchReport {
    pub success: bool,
    pub errors: Vec<String>,
}

/// Error raised when a launcher cannot run the workflow at all, as
/// opposed to a run that finishes and reports failure.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct LaunchError(pub String);

/// Outcome of a single firing, tied to its execution log entry.
#[derive(Debug, Clone)]
pub struct TriggerOutcome {
    pub success: bool,
    /// Id of the log entry recorded for this firing (`exec-*`).
    pub execution_id: String,
    pub error: Option<String>,
}

/// Port the trigger layer drives to actually run a workflow.
pub trait WorkflowLauncher: Send + Sync {
    fn launch<'a>(
        &'a self,
        workflow_name: &str,
        parameters: Option<Value>,
    ) -> BoxFuture<'a, Result<LaunchReport, LaunchError>>;
}

// ---------------------------------------------------------------------------
// Cron normalization
// ---------------------------------------------------------------------------

/// Normalize a cron expression to the 6-field (with seconds) form the
/// underlying scheduler expects, and validate it.
pub fn cron_with_seconds(expression: &str) -> Result<String, SchedulerError> {
    let trimmed = expression.trim();
    let fields = trimmed.split_whitespace().count();

    let normalized = match fields {
        5 => format!("0 {trimmed}"),
        6 => trimmed.to_string(),
        _ => {
            return Err(SchedulerError::InvalidSchedule(format!(
                "expected 5 or 6 cron fields, got {fields}: '{trimmed}'"
            )));
        }
    };

    normalized
        .parse::<croner::Cron>()
        .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;
    Ok(normalized)
}

// ---------------------------------------------------------------------------
// WorkflowScheduler
// ---------------------------------------------------------------------------

/// Registered triggers plus the underlying cron scheduler.
pub struct WorkflowScheduler {
    launcher: Arc<dyn WorkflowLauncher>,
    log: Arc<ExecutionLog>,
    inner: Arc<RwLock<Option<JobScheduler>>>,
    jobs: Arc<RwLock<Vec<ScheduledJob>>>,
    bindings: RwLock<Vec<EventBinding>>,
    known_workflows: RwLock<HashSet<String>>,
    started_at: RwLock<Option<DateTime<Utc>>>,
}

impl WorkflowScheduler {
    pub fn new(launcher: Arc<dyn WorkflowLauncher>) -> Self {
        Self {
            launcher,
            log: Arc::new(ExecutionLog::new()),
            inner: Arc::new(RwLock::new(None)),
            jobs: Arc::new(RwLock::new(Vec::new())),
            bindings: RwLock::new(Vec::new()),
            known_workflows: RwLock::new(HashSet::new()),
            started_at: RwLock::new(None),
        }
    }

    pub fn log(&self) -> &Arc<ExecutionLog> {
        &self.log
    }

    /// Register every workflow's trigger in one pass.
    pub async fn initialize(&self, workflows: &[WorkflowDefinition]) -> Result<(), SchedulerError> {
        for workflow in workflows {
            self.register(workflow).await?;
        }
        Ok(())
    }

    /// Register a workflow's trigger. Validation happens here, before the
    /// scheduler starts: a bad cron expression or timezone never gets as
    /// far as the job queue. Workflows without a trigger (or with a
    /// `manual` one) are still registered for manual launches.
    pub async fn register(&self, workflow: &WorkflowDefinition) -> Result<(), SchedulerError> {
        match &workflow.trigger {
            Some(Trigger::Scheduled { schedule, timezone }) => {
                let expression = cron_with_seconds(schedule)?;
                timezone
                    .parse::<chrono_tz::Tz>()
                    .map_err(|_| SchedulerError::InvalidTimezone(timezone.clone()))?;

                self.jobs.write().await.push(ScheduledJob {
                    workflow_name: workflow.name.clone(),
                    expression,
                    timezone: timezone.clone(),
                    enabled: true,
                    last_run: None,
                    last_status: None,
                });
                tracing::info!(
                    workflow = workflow.name.as_str(),
                    schedule = schedule.as_str(),
                    timezone = timezone.as_str(),
                    "scheduled trigger registered"
                );
            }
            Some(Trigger::OnEvent { event, source }) => {
                self.bindings.write().await.push(EventBinding {
                    event_name: event.clone(),
                    workflow_name: workflow.name.clone(),
                    source: source.clone(),
                });
                tracing::info!(
                    workflow = workflow.name.as_str(),
                    event = event.as_str(),
                    "event trigger registered"
                );
            }
            Some(Trigger::Manual) | None => {}
        }

        self.known_workflows
            .write()
            .await
            .insert(workflow.name.clone());
        Ok(())
    }

    /// Start the cron scheduler and arm every registered calendar trigger.
    /// Calling `start` while already running is a no-op.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.inner.read().await.is_some() {
            return Ok(());
        }
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| SchedulerError::JobError(e.to_string()))?;

        let jobs = self.jobs.read().await.clone();
        for registration in &jobs {
            let tz: chrono_tz::Tz = registration
                .timezone
                .parse()
                .map_err(|_| SchedulerError::InvalidTimezone(registration.timezone.clone()))?;

            let launcher = Arc::clone(&self.launcher);
            let log = Arc::clone(&self.log);
            let jobs_state = Arc::clone(&self.jobs);
            let workflow_name = registration.workflow_name.clone();

            let job = Job::new_async_tz(registration.expression.as_str(), tz, move |_uuid, _l| {
                let launcher = Arc::clone(&launcher);
                let log = Arc::clone(&log);
                let jobs_state = Arc::clone(&jobs_state);
                let workflow_name = workflow_name.clone();
                Box::pin(async move {
                    fire(
                        &launcher,
                        &log,
                        &workflow_name,
                        TriggerType::Scheduled,
                        None,
                        Some(&jobs_state),
                    )
                    .await;
                })
            })
            .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;

            scheduler
                .add(job)
                .await
                .map_err(|e| SchedulerError::JobError(e.to_string()))?;
        }

        scheduler
            .start()
            .await
            .map_err(|e| SchedulerError::JobError(e.to_string()))?;

        *self.inner.write().await = Some(scheduler);
        *self.started_at.write().await = Some(Utc::now());
        tracing::info!(scheduled = jobs.len(), "workflow scheduler started");
        Ok(())
    }

    /// Stop the cron scheduler. Registrations survive a stop; `start`
    /// re-arms them.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let mut inner = self.inner.write().await;
        if let Some(mut scheduler) = inner.take() {
            scheduler
                .shutdown()
                .await
                .map_err(|e| SchedulerError::JobError(e.to_string()))?;
            tracing::info!("workflow scheduler stopped");
        }
        *self.started_at.write().await = None;
        Ok(())
    }

    /// Stop the scheduler and drop all registrations and history.
    pub async fn destroy(&self) -> Result<(), SchedulerError> {
        self.stop().await?;
        self.jobs.write().await.clear();
        self.bindings.write().await.clear();
        self.known_workflows.write().await.clear();
        self.log.clear().await;
        Ok(())
    }

    /// Launch a registered workflow by hand. Records exactly one manual
    /// entry in the execution log regardless of outcome.
    pub async fn trigger(
        &self,
        workflow_name: &str,
        parameters: Option<Value>,
    ) -> Result<TriggerOutcome, SchedulerError> {
        if !self.known_workflows.read().await.contains(workflow_name) {
            return Err(SchedulerError::UnknownWorkflow(workflow_name.to_string()));
        }
        Ok(fire(
            &self.launcher,
            &self.log,
            workflow_name,
            TriggerType::Manual,
            parameters,
            None,
        )
        .await)
    }

    /// Dispatch an event to every matching binding. A binding matches
    /// when its event name matches and its source filter (if any) matches.
    /// Each launch runs detached; the call returns the number of bindings
    /// that fired.
    pub async fn emit_event(
        &self,
        event_name: &str,
        source: Option<&str>,
        payload: Option<Value>,
    ) -> usize {
        let matches: Vec<EventBinding> = self
            .bindings
            .read()
            .await
            .iter()
            .filter(|b| {
                b.event_name == event_name
                    && match (&b.source, source) {
                        (Some(want), Some(got)) => want == got,
                        (Some(_), None) => false,
                        (None, _) => true,
                    }
            })
            .cloned()
            .collect();

        for binding in &matches {
            let launcher = Arc::clone(&self.launcher);
            let log = Arc::clone(&self.log);
            let workflow_name = binding.workflow_name.clone();
            let payload = payload.clone();
            tokio::spawn(async move {
                fire(
                    &launcher,
                    &log,
                    &workflow_name,
                    TriggerType::Event,
                    payload,
                    None,
                )
                .await;
            });
        }

        tracing::debug!(event = event_name, fired = matches.len(), "event dispatched");
        matches.len()
    }

    /// Point-in-time snapshot for status queries.
    pub async fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.inner.read().await.is_some(),
            started_at: *self.started_at.read().await,
            scheduled_jobs: self.jobs.read().await.clone(),
            event_bindings: self.bindings.read().await.clone(),
            recent_executions: self.log.get_recent(10).await,
        }
    }
}

/// Run one launch end to end with its log entry. A launcher `Err` and a
/// report of failure both settle the entry as failed; the error column
/// carries the launcher's message or the first reported error.
async fn fire(
    launcher: &Arc<dyn WorkflowLauncher>,
    log: &Arc<ExecutionLog>,
    workflow_name: &str,
    trigger_type: TriggerType,
    parameters: Option<Value>,
    jobs: Option<&Arc<RwLock<Vec<ScheduledJob>>>>,
) -> TriggerOutcome {
    let id = log.begin(workflow_name, trigger_type, parameters.clone()).await;
    tracing::info!(
        execution = id.as_str(),
        workflow = workflow_name,
        trigger = ?trigger_type,
        "launching workflow"
    );

    let (success, error) = match launcher.launch(workflow_name, parameters).await {
        Ok(report) => {
            let first = report.errors.into_iter().next();
            (report.success, first)
        }
        Err(e) => (false, Some(e.to_string())),
    };
    let status = if success {
        ExecutionStatus::Success
    } else {
        ExecutionStatus::Failed
    };
    log.finish(&id, status, error.clone()).await;

    if let Some(jobs) = jobs {
        let mut jobs = jobs.write().await;
        if let Some(job) = jobs
            .iter_mut()
            .find(|j| j.workflow_name == workflow_name)
        {
            job.last_run = Some(Utc::now());
            job.last_status = Some(status);
        }
    }

    if let Some(error) = &error {
        tracing::warn!(
            execution = id.as_str(),
            workflow = workflow_name,
            error = error.as_str(),
            "workflow launch failed"
        );
    }
    TriggerOutcome {
        success,
        execution_id: id,
        error,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
