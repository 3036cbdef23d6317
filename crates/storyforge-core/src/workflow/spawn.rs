//! Agent spawn port.
//!
//! The engine never spawns processes or terminals itself; it drives a
//! `SpawnCapability` supplied by the caller. The trait is dyn-compatible
//! (boxed futures) so implementations can live behind `Arc<dyn ...>`.

use std::time::Duration;

use futures_util::future::BoxFuture;

/// Options for a single agent spawn.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Hard deadline for the spawn; the engine enforces it with a timeout.
    pub timeout: Duration,
    /// Whether the agent should run in a visible terminal.
    pub in_terminal: bool,
}

/// Outcome of a single agent spawn.
///
/// Failures are values here, not errors: an agent that exits non-zero is a
/// failed phase, not a broken engine.
#[derive(Debug, Clone, Default)]
pub struct SpawnOutcome {
    pub success: bool,
    /// Captured agent output (possibly truncated by the implementation).
    pub output: String,
    /// Path to a full output transcript, if the implementation wrote one.
    pub output_file: Option<String>,
    /// OS process id, when the agent ran as a separate process.
    pub pid: Option<u32>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl SpawnOutcome {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Port for spawning agents.
///
/// Agent names arrive without the `@` prefix -- the engine strips it
/// before dispatch.
pub trait SpawnCapability: Send + Sync {
    /// Whether spawning is possible at all in this environment.
    fn is_available(&self) -> bool;

    /// Spawn an agent on a task and wait for it to finish.
    fn spawn_agent<'a>(
        &'a self,
        agent: &str,
        task: &str,
        opts: SpawnOptions,
    ) -> BoxFuture<'a, SpawnOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoSpawner;

    impl SpawnCapability for EchoSpawner {
        fn is_available(&self) -> bool {
            true
        }

        fn spawn_agent<'a>(
            &'a self,
            agent: &str,
            task: &str,
            _opts: SpawnOptions,
        ) -> BoxFuture<'a, SpawnOutcome> {
            let output = format!("{agent}:{task}");
            Box::pin(async move {
                SpawnOutcome {
                    success: true,
                    output,
                    duration_ms: 1,
                    ..SpawnOutcome::default()
                }
            })
        }
    }

    #[tokio::test]
    async fn test_dyn_spawner_usable_through_arc() {
        let spawner: std::sync::Arc<dyn SpawnCapability> = std::sync::Arc::new(EchoSpawner);
        let outcome = spawner
            .spawn_agent(
                "dev",
                "implement-story",
                SpawnOptions {
                    timeout: Duration::from_secs(1),
                    in_terminal: false,
                },
            )
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.output, "dev:implement-story");
    }

    #[test]
    fn test_failure_constructor() {
        let outcome = SpawnOutcome::failure("boom");
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("boom"));
    }
}
