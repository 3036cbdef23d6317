//! Scheduler bookkeeping types: trigger registrations, execution log
//! entries, and the status snapshot surfaced to status queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Trigger and execution classification
// ---------------------------------------------------------------------------

/// How an execution was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Manual,
    Scheduled,
    Event,
}

/// Status of a logged execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Success,
    Failed,
    Cancelled,
}

// ---------------------------------------------------------------------------
// Execution log entry
// ---------------------------------------------------------------------------

/// One entry in the rolling execution history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    /// Execution id of the form `exec-<millis>-<seq>`.
    pub id: String,
    pub workflow_name: String,
    pub trigger_type: TriggerType,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Parameters passed to the launch, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// Execution counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub running: usize,
    pub success: usize,
    pub failed: usize,
    pub cancelled: usize,
}

// ---------------------------------------------------------------------------
// Trigger registrations
// ---------------------------------------------------------------------------

/// A registered calendar trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub workflow_name: String,
    /// Cron expression as written in the workflow definition.
    pub expression: String,
    /// IANA timezone name the expression is evaluated in.
    pub timezone: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status: Option<ExecutionStatus>,
}

/// A registered event binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBinding {
    pub event_name: String,
    pub workflow_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

// ---------------------------------------------------------------------------
// Status snapshot
// ---------------------------------------------------------------------------

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub running: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub scheduled_jobs: Vec<ScheduledJob>,
    pub event_bindings: Vec<EventBinding>,
    pub recent_executions: Vec<ExecutionLogEntry>,
}
