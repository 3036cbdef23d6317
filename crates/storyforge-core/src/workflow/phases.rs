//! Per-phase executors.
//!
//! `PhaseRunner` dispatches a phase definition to the executor matching its
//! `id`. Every executor returns a `PhaseResult` -- business failures (agent
//! crashed, validation failed, gate rejected) are values, never `Err`.
//! Conditions are evaluated before anything else, so a skipped phase has no
//! side effects at all.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use storyforge_types::config::EngineConfig;
use storyforge_types::execution::{CheckpointDecision, ExecutionState, PhasePayload, PhaseResult};
use storyforge_types::workflow::{AgentRef, PhaseDefinition};

use super::analysis::StaticAnalyzer;
use super::condition::Condition;
use super::spawn::{SpawnCapability, SpawnOptions};

// ---------------------------------------------------------------------------
// PhaseRunner
// ---------------------------------------------------------------------------

/// Executes individual phases against the engine's ports.
pub struct PhaseRunner {
    spawner: Arc<dyn SpawnCapability>,
    analyzer: Arc<dyn StaticAnalyzer>,
    config: EngineConfig,
}

impl PhaseRunner {
    pub fn new(
        spawner: Arc<dyn SpawnCapability>,
        analyzer: Arc<dyn StaticAnalyzer>,
        config: EngineConfig,
    ) -> Self {
        Self {
            spawner,
            analyzer,
            config,
        }
    }

    /// Run one phase. `decision` is consulted only by the checkpoint phase.
    pub async fn run(
        &self,
        phase_key: &str,
        phase: &PhaseDefinition,
        state: &ExecutionState,
        decision: CheckpointDecision,
    ) -> PhaseResult {
        // Condition short-circuit happens before any other work.
        if let Some(expr) = &phase.condition {
            let condition = match Condition::parse(expr) {
                Ok(c) => c,
                Err(e) => return PhaseResult::failed(e.to_string()),
            };
            let scope = json!({
                "config": self.config.to_scope(),
                "state": state_scope(state),
            });
            if !condition.evaluate(&scope) {
                tracing::debug!(
                    phase = phase_key,
                    condition = condition.raw(),
                    "phase condition not met, skipping"
                );
                return PhaseResult::skipped(format!("Condition not met: {}", condition.raw()));
            }
        }

        match phase.id.as_str() {
            "validation" => self.run_validation(state),
            "self_healing" => self.run_self_healing(state).await,
            "checkpoint" => Self::run_checkpoint(decision),
            "quality_gate" => self.run_quality_gate(phase, state).await,
            // Development, publish, and any future agent phase all spawn.
            _ => self.run_spawn(phase, state).await,
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Check that the run's agent assignments are usable before any agent
    /// is spawned.
    fn run_validation(&self, state: &ExecutionState) -> PhaseResult {
        let mut issues = Vec::new();
        if state.executor.trim().is_empty() {
            issues.push("story declares no executor agent".to_string());
        }
        if state.quality_gate.trim().is_empty() {
            issues.push("story declares no quality gate agent".to_string());
        }
        if !state.executor.is_empty() && state.executor == state.quality_gate {
            issues.push(format!(
                "executor and quality gate must differ (both are '{}')",
                state.executor
            ));
        }

        if issues.is_empty() {
            PhaseResult::completed(PhasePayload::Validation {
                passed: true,
                score: 100,
                issues: vec![],
            })
        } else {
            PhaseResult::failed_with(
                PhasePayload::Validation {
                    passed: false,
                    score: 0,
                    issues: issues.clone(),
                },
                format!("story validation failed: {}", issues.join("; ")),
            )
        }
    }

    // -----------------------------------------------------------------------
    // Agent-spawning phases
    // -----------------------------------------------------------------------

    /// Spawn the phase's agent and wait for it, bounded by the configured
    /// timeout.
    async fn run_spawn(&self, phase: &PhaseDefinition, state: &ExecutionState) -> PhaseResult {
        let agent = match resolve_agent(&phase.agent, state) {
            Ok(agent) => agent,
            Err(msg) => return PhaseResult::failed(msg),
        };
        self.spawn_resolved(&agent, phase).await
    }

    /// Like `run_spawn`, but re-asserts the reviewer/executor separation at
    /// dispatch time -- state may have been edited between phases.
    async fn run_quality_gate(
        &self,
        phase: &PhaseDefinition,
        state: &ExecutionState,
    ) -> PhaseResult {
        let agent = match resolve_agent(&phase.agent, state) {
            Ok(agent) => agent,
            Err(msg) => return PhaseResult::failed(msg),
        };
        if agent == state.executor {
            return PhaseResult::failed(format!(
                "quality gate agent '{agent}' must differ from executor '{}'",
                state.executor
            ));
        }
        self.spawn_resolved(&agent, phase).await
    }

    async fn spawn_resolved(&self, agent: &str, phase: &PhaseDefinition) -> PhaseResult {
        if !self.spawner.is_available() {
            return PhaseResult::failed("agent spawn capability unavailable");
        }

        let timeout = Duration::from_secs(self.config.spawn_timeout_minutes * 60);
        let opts = SpawnOptions {
            timeout,
            in_terminal: phase.spawn_in_terminal,
        };

        // Spawners receive the bare agent name, without the `@` prefix.
        let name = agent.strip_prefix('@').unwrap_or(agent);
        tracing::info!(agent = name, task = phase.task.as_str(), "spawning agent");

        let spawned = tokio::time::timeout(timeout, self.spawner.spawn_agent(name, &phase.task, opts));
        match spawned.await {
            Ok(outcome) if outcome.success => PhaseResult::completed(PhasePayload::Spawn {
                output: outcome.output,
                output_file: outcome.output_file,
                duration_ms: outcome.duration_ms,
            }),
            Ok(outcome) => {
                let error = outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("agent '{name}' reported failure"));
                PhaseResult::failed_with(
                    PhasePayload::Spawn {
                        output: outcome.output,
                        output_file: outcome.output_file,
                        duration_ms: outcome.duration_ms,
                    },
                    error,
                )
            }
            Err(_elapsed) => PhaseResult::failed(format!(
                "agent '{name}' timed out after {} minutes",
                self.config.spawn_timeout_minutes
            )),
        }
    }

    // -----------------------------------------------------------------------
    // Self-healing
    // -----------------------------------------------------------------------

    /// Run bounded analyze-and-correct iterations. The phase degrades
    /// gracefully: a missing tool or remaining issues still complete the
    /// phase with an explanatory note.
    async fn run_self_healing(&self, state: &ExecutionState) -> PhaseResult {
        let healing = &self.config.self_healing;

        if !self.analyzer.is_installed().await {
            if healing.graceful_degradation.skip_if_not_installed {
                tracing::warn!("analysis tool not installed, degrading gracefully");
                return PhaseResult::completed(PhasePayload::Healing {
                    note: healing.graceful_degradation.fallback_message.clone(),
                    iterations: 0,
                });
            }
            return PhaseResult::failed("analysis tool not installed");
        }

        let mut last_issues = Vec::new();
        for iteration in 1..=healing.max_iterations {
            let report = self.analyzer.analyze(&state.current_story).await;
            if report.tool_missing {
                // Tool disappeared mid-run; treat as the uninstalled case.
                return PhaseResult::completed(PhasePayload::Healing {
                    note: healing.graceful_degradation.fallback_message.clone(),
                    iterations: iteration - 1,
                });
            }
            if report.success {
                return PhaseResult::completed(PhasePayload::Healing {
                    note: "analysis clean".to_string(),
                    iterations: iteration,
                });
            }
            tracing::debug!(
                iteration,
                issues = report.issues.len(),
                "analysis found issues"
            );
            last_issues = report.issues;
        }

        // Out of iterations. Self-healing is advisory, so the phase still
        // completes and the remaining issues travel in the note.
        PhaseResult::completed(PhasePayload::Healing {
            note: format!(
                "issues remain after {} iterations: {}",
                healing.max_iterations,
                last_issues.join("; ")
            ),
            iterations: healing.max_iterations,
        })
    }

    // -----------------------------------------------------------------------
    // Checkpoint
    // -----------------------------------------------------------------------

    /// The checkpoint phase always completes; routing interprets the
    /// decision.
    fn run_checkpoint(decision: CheckpointDecision) -> PhaseResult {
        PhaseResult::completed(PhasePayload::Checkpoint {
            decision,
            options: CheckpointDecision::ALL.to_vec(),
        })
    }
}

// ---------------------------------------------------------------------------
// Agent resolution
// ---------------------------------------------------------------------------

/// Resolve an `AgentRef` against run state at dispatch time.
fn resolve_agent(agent: &AgentRef, state: &ExecutionState) -> Result<String, String> {
    match agent {
        AgentRef::Literal(name) => Ok(name.clone()),
        AgentRef::Reference(path) => match path.as_str() {
            "story.executor" => Ok(state.executor.clone()),
            "story.quality_gate" => Ok(state.quality_gate.clone()),
            other => Err(format!("unknown agent reference: '${{{other}}}'")),
        },
    }
}

/// The portion of run state exposed to condition expressions.
fn state_scope(state: &ExecutionState) -> serde_json::Value {
    json!({
        "attempt_count": state.attempt_count,
        "current_phase": state.current_phase,
        "story": state.current_story,
        "executor": state.executor,
        "quality_gate": state.quality_gate,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
