//! Named error handlers: retry budgets and escalation.
//!
//! An `on_failure` edge that names an entry in the workflow's
//! `error_handlers` map routes the failure here. Actions run in the order
//! written; `max_attempts` reads the attempt counter after any preceding
//! `increment_attempt`, so `[increment_attempt, max_attempts: 3]` allows
//! two retries before escalating.
//!
//! Retry targets follow the `return_to_<phase-id>` naming convention: the
//! handler id names the phase (by its `id` field) the workflow re-enters.
//! A handler with retry budget but no resolvable target escalates.

use storyforge_types::execution::{ExecutionState, PhaseResult};
use storyforge_types::workflow::{HandlerAction, WorkflowDefinition};

/// What the executor should do after a handler fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerOutcome {
    /// Phase key to re-enter, when retrying.
    pub next_phase: Option<String>,
    /// Whether the failed work should be retried.
    pub retry: bool,
    /// Whether the failure escalates to a human.
    pub escalate: bool,
}

impl HandlerOutcome {
    fn escalated() -> Self {
        Self {
            next_phase: None,
            retry: false,
            escalate: true,
        }
    }
}

/// Run the named handler's actions against the current run state.
///
/// Returns `None` when no handler with that id exists -- the caller
/// decides whether that is a routing target instead.
pub fn run_handler(
    definition: &WorkflowDefinition,
    handler_id: &str,
    result: &PhaseResult,
    state: &mut ExecutionState,
) -> Option<HandlerOutcome> {
    let handler = definition.error_handlers.get(handler_id)?;

    let mut outcome = HandlerOutcome::escalated();
    for action in &handler.actions {
        match action {
            HandlerAction::Log(message) => {
                tracing::warn!(
                    handler = handler_id,
                    phase = state.current_phase.as_str(),
                    error = result.error.as_deref().unwrap_or(""),
                    "{message}"
                );
            }
            HandlerAction::IncrementAttempt => {
                state.attempt_count += 1;
            }
            HandlerAction::MaxAttempts(limit) => {
                if state.attempt_count < *limit {
                    match recovery_target(definition, handler_id) {
                        Some(target) => {
                            outcome = HandlerOutcome {
                                next_phase: Some(target),
                                retry: true,
                                escalate: false,
                            };
                        }
                        None => {
                            tracing::warn!(
                                handler = handler_id,
                                "retry budget remains but handler names no recovery phase"
                            );
                            outcome = HandlerOutcome::escalated();
                        }
                    }
                } else {
                    tracing::warn!(
                        handler = handler_id,
                        attempts = state.attempt_count,
                        limit,
                        "attempt limit reached, escalating"
                    );
                    outcome = HandlerOutcome::escalated();
                }
            }
        }
    }

    Some(outcome)
}

/// Resolve the phase a `return_to_<phase-id>` handler re-enters.
fn recovery_target(definition: &WorkflowDefinition, handler_id: &str) -> Option<String> {
    let phase_id = handler_id.strip_prefix("return_to_")?;
    definition.phases.key_for_id(phase_id).map(str::to_string)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
