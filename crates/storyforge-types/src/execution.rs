//! Phase execution records and persisted run state.
//!
//! `PhaseResult` is the value-level outcome of running a single phase
//! (business failures are results, never errors), and `ExecutionState` is
//! the crash-safe record persisted after every phase transition. The state
//! record serializes with camelCase field names to stay compatible with
//! existing on-disk state files.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Phase status and results
// ---------------------------------------------------------------------------

/// Status of a single phase execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// Phase-specific result payload.
///
/// Internally tagged by `type` to match the persisted YAML structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PhasePayload {
    /// Output of the validation phase.
    Validation {
        passed: bool,
        score: u32,
        issues: Vec<String>,
    },
    /// Output of an agent-spawning phase (development, quality gate, publish).
    Spawn {
        output: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_file: Option<String>,
        duration_ms: u64,
    },
    /// Output of the self-healing phase.
    Healing { note: String, iterations: u32 },
    /// Output of the checkpoint phase.
    Checkpoint {
        decision: CheckpointDecision,
        options: Vec<CheckpointDecision>,
    },
    /// Reason a phase was skipped.
    Skip { reason: String },
    /// No payload (failed phases and placeholders).
    None,
}

/// The outcome of executing one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub status: PhaseStatus,
    pub payload: PhasePayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PhaseResult {
    pub fn completed(payload: PhasePayload) -> Self {
        Self {
            status: PhaseStatus::Completed,
            payload,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: PhaseStatus::Failed,
            payload: PhasePayload::None,
            error: Some(error.into()),
        }
    }

    pub fn failed_with(payload: PhasePayload, error: impl Into<String>) -> Self {
        Self {
            status: PhaseStatus::Failed,
            payload,
            error: Some(error.into()),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: PhaseStatus::Skipped,
            payload: PhasePayload::Skip {
                reason: reason.into(),
            },
            error: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == PhaseStatus::Completed
    }

    pub fn is_skipped(&self) -> bool {
        self.status == PhaseStatus::Skipped
    }
}

// ---------------------------------------------------------------------------
// Checkpoint decisions
// ---------------------------------------------------------------------------

/// Human decision offered at the checkpoint phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckpointDecision {
    /// Start the next story (route back to the first phase).
    Go,
    /// Suspend the workflow; resumable later.
    Pause,
    /// Stay at the checkpoint for another look.
    Review,
    /// Abandon the workflow.
    Abort,
}

impl CheckpointDecision {
    /// The fixed option set offered at every checkpoint.
    pub const ALL: [CheckpointDecision; 4] = [
        CheckpointDecision::Go,
        CheckpointDecision::Pause,
        CheckpointDecision::Review,
        CheckpointDecision::Abort,
    ];
}

// ---------------------------------------------------------------------------
// Execution state (persisted record)
// ---------------------------------------------------------------------------

/// The crash-safe per-story run record.
///
/// One record exists per story; it is rewritten in full after every phase
/// transition. On resume the record is rehydrated verbatim and completed
/// phases are never re-executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    /// Workflow definition id this run belongs to.
    pub workflow_id: String,
    /// Key of the phase the run is currently at (or a terminal sentinel).
    pub current_phase: String,
    /// Story file reference (path or slug) this run executes.
    pub current_story: String,
    /// Agent assigned as executor, as written in story metadata (e.g. "@dev").
    pub executor: String,
    /// Agent assigned as quality gate. Must differ from `executor`.
    pub quality_gate: String,
    /// Retry attempt counter, bumped by `increment_attempt` handler actions.
    pub attempt_count: u32,
    /// When this run started.
    pub started_at: DateTime<Utc>,
    /// When this record was last persisted. Staleness here signals a crash.
    pub last_updated: DateTime<Utc>,
    /// Results of every phase executed so far, keyed by phase key.
    #[serde(default)]
    pub phase_results: BTreeMap<String, PhaseResult>,
    /// Free-form context accumulated across phases.
    #[serde(default = "default_context")]
    pub accumulated_context: serde_json::Value,
}

fn default_context() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl ExecutionState {
    /// Create a fresh run record positioned at `first_phase`.
    pub fn new(workflow_id: &str, story_ref: &str, first_phase: &str) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: workflow_id.to_string(),
            current_phase: first_phase.to_string(),
            current_story: story_ref.to_string(),
            executor: String::new(),
            quality_gate: String::new(),
            attempt_count: 0,
            started_at: now,
            last_updated: now,
            phase_results: BTreeMap::new(),
            accumulated_context: default_context(),
        }
    }

    /// Record a phase result and advance the bookkeeping timestamps.
    pub fn record_phase(&mut self, phase_key: &str, result: PhaseResult) {
        self.phase_results.insert(phase_key.to_string(), result);
        self.current_phase = phase_key.to_string();
        self.last_updated = Utc::now();
    }

    /// Whether `phase_key` already completed in a previous run.
    pub fn phase_completed(&self, phase_key: &str) -> bool {
        self.phase_results
            .get(phase_key)
            .is_some_and(PhaseResult::is_completed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
