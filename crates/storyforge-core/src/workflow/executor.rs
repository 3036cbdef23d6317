//! The sequential workflow driver.
//!
//! `WorkflowExecutor` owns one workflow definition and drives a story
//! through it: acquire the story lock, initialize or resume state, then
//! loop run -> record -> notify -> route -> persist until a terminal
//! sentinel, an escalation, or a dangling edge ends the run.
//!
//! Only infrastructure problems leave `execute` as `Err`: definition and
//! story loading, lock contention, and persistence. Everything the
//! workflow itself can express (failed phases, escalations, aborts) comes
//! back as an `ExecutionReport`.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use storyforge_types::config::EngineConfig;
use storyforge_types::execution::{
    CheckpointDecision, ExecutionState, PhasePayload, PhaseResult,
};
use storyforge_types::workflow::{
    PhaseDefinition, ROUTE_ABORTED, ROUTE_PAUSED, RouteTarget, WorkflowDefinition,
};
use uuid::Uuid;

use super::analysis::StaticAnalyzer;
use super::definition::DefinitionError;
use super::handler::run_handler;
use super::lock::LockManager;
use super::phases::PhaseRunner;
use super::spawn::SpawnCapability;
use super::state::{StateError, StateStore};
use super::story::{StoryError, load_story_file};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Infrastructure errors that abort a run before or outside phase
/// execution.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Workflow definition problem.
    #[error("definition error: {0}")]
    Definition(#[from] DefinitionError),

    /// Story metadata could not be read.
    #[error("story error: {0}")]
    Story(#[from] StoryError),

    /// State record could not be persisted or loaded.
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Another run holds this story's lock.
    #[error("story '{0}' is locked by another run")]
    LockContention(String),
}

// ---------------------------------------------------------------------------
// Options and report
// ---------------------------------------------------------------------------

/// Caller-supplied knobs for one execution.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Rehydrate a persisted record instead of starting fresh.
    pub auto_resume: bool,
    /// Decision applied at checkpoint phases. Defaults to `Pause` so an
    /// unattended run terminates instead of cycling back to the start.
    pub checkpoint_decision: CheckpointDecision,
    /// Upper bound on phase transitions (guards `Review` self-loops and
    /// cyclic definitions).
    pub max_transitions: u32,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            auto_resume: true,
            checkpoint_decision: CheckpointDecision::Pause,
            max_transitions: 64,
        }
    }
}

/// Outcome of one driver run.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub run_id: Uuid,
    pub success: bool,
    /// The phase key or terminal sentinel the run ended at.
    pub final_phase: String,
    pub phase_results: BTreeMap<String, PhaseResult>,
    /// The run stopped because an error handler escalated to a human.
    pub escalated: bool,
    pub error: Option<String>,
}

/// Callback invoked after every non-skipped phase.
pub type PhaseObserver = Arc<dyn Fn(&str, &PhaseResult) + Send + Sync>;

/// Where routing sends the run next.
enum NextStep {
    Continue(String),
    Finished,
    Paused,
    Aborted,
    FailedTerminal,
    Escalated,
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// Drives stories through a single workflow definition.
pub struct WorkflowExecutor {
    definition: WorkflowDefinition,
    runner: PhaseRunner,
    store: StateStore,
    locks: Arc<dyn LockManager>,
    observers: Vec<PhaseObserver>,
}

impl WorkflowExecutor {
    pub fn new(
        definition: WorkflowDefinition,
        config: EngineConfig,
        spawner: Arc<dyn SpawnCapability>,
        analyzer: Arc<dyn StaticAnalyzer>,
        locks: Arc<dyn LockManager>,
        state_dir: impl Into<std::path::PathBuf>,
    ) -> Self {
        Self {
            definition,
            runner: PhaseRunner::new(spawner, analyzer, config),
            store: StateStore::new(state_dir),
            locks,
            observers: Vec::new(),
        }
    }

    /// Register an observer called after every non-skipped phase.
    pub fn on_phase_change(&mut self, observer: impl Fn(&str, &PhaseResult) + Send + Sync + 'static) {
        self.observers.push(Arc::new(observer));
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    /// Run one phase by key. An unknown key is a failed result, not an
    /// error -- dangling edges resolve at the moment routing reaches them.
    pub async fn execute_phase(
        &self,
        phase_key: &str,
        state: &ExecutionState,
        decision: CheckpointDecision,
    ) -> PhaseResult {
        match self.definition.phases.get(phase_key) {
            Some(phase) => self.runner.run(phase_key, phase, state, decision).await,
            None => PhaseResult::failed(format!("Phase not found: {phase_key}")),
        }
    }

    /// Execute a story through the workflow.
    pub async fn execute(
        &self,
        story_path: &Path,
        opts: ExecuteOptions,
    ) -> Result<ExecutionReport, ExecutorError> {
        let story_ref = story_path.to_string_lossy().to_string();

        if !self.locks.acquire(&story_ref).await {
            return Err(ExecutorError::LockContention(story_ref));
        }

        let result = self.run_locked(story_path, &story_ref, opts).await;
        self.locks.release(&story_ref).await;
        result
    }

    async fn run_locked(
        &self,
        story_path: &Path,
        story_ref: &str,
        opts: ExecuteOptions,
    ) -> Result<ExecutionReport, ExecutorError> {
        let run_id = Uuid::now_v7();
        let first_phase = self
            .definition
            .first_phase()
            .ok_or_else(|| {
                DefinitionError::Validation("workflow has no phases".to_string())
            })?
            .to_string();

        let (mut state, resumed) =
            self.store
                .initialize(&self.definition.id, story_ref, &first_phase, opts.auto_resume)?;

        if resumed {
            if let Some(crash) =
                StateStore::detect_crash(&state, chrono::Duration::minutes(30))
            {
                tracing::warn!(
                    run_id = %run_id,
                    story = story_ref,
                    phase = crash.stalled_phase.as_str(),
                    idle_minutes = crash.idle.num_minutes(),
                    "stale state record, previous run likely crashed"
                );
            }
        } else {
            let meta = load_story_file(story_path)?;
            state.executor = meta.executor;
            state.quality_gate = meta.quality_gate;
            if let Some(ctx) = state.accumulated_context.as_object_mut() {
                ctx.insert(
                    "quality_gate_tools".to_string(),
                    serde_json::json!(meta.quality_gate_tools),
                );
            }
            self.store.save(&state)?;
        }

        tracing::info!(
            run_id = %run_id,
            workflow = self.definition.id.as_str(),
            story = story_ref,
            resumed,
            "starting workflow execution"
        );

        // Phases completed before this process-run are skipped exactly once
        // on the way past; a retry that re-enters one later re-executes it.
        let mut resume_skips: HashSet<String> = if resumed {
            state
                .phase_results
                .iter()
                .filter(|(_, r)| r.is_completed())
                .map(|(k, _)| k.clone())
                .collect()
        } else {
            HashSet::new()
        };

        let mut transitions = 0u32;
        loop {
            let current = state.current_phase.clone();

            match RouteTarget::parse(&current) {
                RouteTarget::Paused => {
                    return Ok(self.report(run_id, &state, true, false, None));
                }
                RouteTarget::Aborted => {
                    return Ok(self.report(
                        run_id,
                        &state,
                        false,
                        false,
                        Some("workflow aborted".to_string()),
                    ));
                }
                RouteTarget::Named(_) => {}
            }

            transitions += 1;
            if transitions > opts.max_transitions {
                return Ok(self.report(
                    run_id,
                    &state,
                    false,
                    false,
                    Some(format!(
                        "transition limit of {} exceeded at phase '{current}'",
                        opts.max_transitions
                    )),
                ));
            }

            if resume_skips.remove(&current) {
                // Route past the recorded result without re-executing or
                // re-notifying.
                let recorded = match state.phase_results.get(&current) {
                    Some(result) => result.clone(),
                    None => PhaseResult::failed(format!("Phase not found: {current}")),
                };
                tracing::debug!(
                    run_id = %run_id,
                    phase = current.as_str(),
                    "skipping completed phase on resume"
                );
                let phase = self.definition.phases.get(&current);
                match self.advance(&current, phase, &recorded, &mut state)? {
                    Some(report) => return Ok(self.finish(run_id, report, &state)),
                    None => continue,
                }
            }

            let result = self
                .execute_phase(&current, &state, opts.checkpoint_decision)
                .await;
            state.record_phase(&current, result.clone());
            if let Ok(payload) = serde_json::to_value(&result.payload) {
                if let Some(ctx) = state.accumulated_context.as_object_mut() {
                    ctx.insert(current.clone(), payload);
                }
            }

            if !result.is_skipped() {
                for observer in &self.observers {
                    observer(&current, &result);
                }
            }

            tracing::info!(
                run_id = %run_id,
                phase = current.as_str(),
                status = ?result.status,
                "phase finished"
            );

            let phase = self.definition.phases.get(&current);
            match self.advance(&current, phase, &result, &mut state)? {
                Some(report) => return Ok(self.finish(run_id, report, &state)),
                None => continue,
            }
        }
    }

    /// Route one result, mutate state accordingly, persist, and either
    /// produce a terminal report skeleton or signal the loop to continue.
    fn advance(
        &self,
        phase_key: &str,
        phase: Option<&PhaseDefinition>,
        result: &PhaseResult,
        state: &mut ExecutionState,
    ) -> Result<Option<ReportSkeleton>, ExecutorError> {
        let step = self.next_step(phase_key, phase, result, state);

        let skeleton = match step {
            NextStep::Continue(next) => {
                state.current_phase = next;
                None
            }
            NextStep::Finished => Some(ReportSkeleton {
                success: true,
                escalated: false,
                error: None,
            }),
            NextStep::Paused => {
                state.current_phase = ROUTE_PAUSED.to_string();
                Some(ReportSkeleton {
                    success: true,
                    escalated: false,
                    error: None,
                })
            }
            NextStep::Aborted => {
                state.current_phase = ROUTE_ABORTED.to_string();
                Some(ReportSkeleton {
                    success: false,
                    escalated: false,
                    error: Some("workflow aborted".to_string()),
                })
            }
            NextStep::FailedTerminal => Some(ReportSkeleton {
                success: false,
                escalated: false,
                error: result.error.clone(),
            }),
            NextStep::Escalated => Some(ReportSkeleton {
                success: false,
                escalated: true,
                error: result.error.clone(),
            }),
        };

        state.last_updated = chrono::Utc::now();
        self.store.save(state)?;
        Ok(skeleton)
    }

    /// Decide where the run goes after one phase result.
    fn next_step(
        &self,
        phase_key: &str,
        phase: Option<&PhaseDefinition>,
        result: &PhaseResult,
        state: &mut ExecutionState,
    ) -> NextStep {
        // Checkpoint routing is decision-driven, not edge-driven.
        if result.is_completed() {
            if let PhasePayload::Checkpoint { decision, .. } = &result.payload {
                return match decision {
                    CheckpointDecision::Go => match self.definition.first_phase() {
                        Some(first) => NextStep::Continue(first.to_string()),
                        None => NextStep::Finished,
                    },
                    CheckpointDecision::Pause => NextStep::Paused,
                    CheckpointDecision::Abort => NextStep::Aborted,
                    CheckpointDecision::Review => NextStep::Continue(phase_key.to_string()),
                };
            }
        }

        let Some(phase) = phase else {
            // Dangling edge: the failure is already recorded, end the run.
            return NextStep::FailedTerminal;
        };

        if result.is_completed() {
            return match &phase.on_success {
                Some(edge) => Self::follow_edge(edge),
                None => NextStep::Finished,
            };
        }
        if result.is_skipped() {
            return match phase.on_skip.as_ref().or(phase.on_success.as_ref()) {
                Some(edge) => Self::follow_edge(edge),
                None => NextStep::Finished,
            };
        }

        // Failed: the edge may name an error handler.
        let Some(edge) = &phase.on_failure else {
            return NextStep::FailedTerminal;
        };
        if let Some(outcome) = run_handler(&self.definition, edge, result, state) {
            return match (outcome.retry, outcome.next_phase) {
                (true, Some(target)) => NextStep::Continue(target),
                _ => NextStep::Escalated,
            };
        }
        Self::follow_edge(edge)
    }

    fn follow_edge(edge: &str) -> NextStep {
        match RouteTarget::parse(edge) {
            RouteTarget::Paused => NextStep::Paused,
            RouteTarget::Aborted => NextStep::Aborted,
            RouteTarget::Named(key) => NextStep::Continue(key),
        }
    }

    fn finish(&self, run_id: Uuid, skeleton: ReportSkeleton, state: &ExecutionState) -> ExecutionReport {
        self.report(run_id, state, skeleton.success, skeleton.escalated, skeleton.error)
    }

    fn report(
        &self,
        run_id: Uuid,
        state: &ExecutionState,
        success: bool,
        escalated: bool,
        error: Option<String>,
    ) -> ExecutionReport {
        tracing::info!(
            run_id = %run_id,
            final_phase = state.current_phase.as_str(),
            success,
            escalated,
            "workflow run finished"
        );
        ExecutionReport {
            run_id,
            success,
            final_phase: state.current_phase.clone(),
            phase_results: state.phase_results.clone(),
            escalated,
            error,
        }
    }
}

/// Terminal outcome computed by routing, before the report is assembled.
struct ReportSkeleton {
    success: bool,
    escalated: bool,
    error: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
