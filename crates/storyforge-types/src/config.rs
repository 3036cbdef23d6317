//! Engine configuration types.
//!
//! Loaded from YAML; every field has a serde default so a missing or empty
//! document yields a workable configuration with self-healing disabled.

use serde::{Deserialize, Serialize};

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Self-healing phase configuration.
    #[serde(default)]
    pub self_healing: SelfHealingConfig,
    /// Timeout applied to every agent spawn, in minutes.
    #[serde(default = "default_spawn_timeout_minutes")]
    pub spawn_timeout_minutes: u64,
}

fn default_spawn_timeout_minutes() -> u64 {
    30
}

impl EngineConfig {
    /// Render the configuration as JSON for condition evaluation scopes.
    pub fn to_scope(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Configuration for the self-healing phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfHealingConfig {
    /// Whether self-healing runs at all. Conditions in workflow YAML
    /// typically reference this field.
    #[serde(default)]
    pub enabled: bool,
    /// Bounded number of analyze-and-correct iterations.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Per-iteration timeout in minutes.
    #[serde(default = "default_healing_timeout_minutes")]
    pub timeout_minutes: u64,
    /// Behavior when the analysis tool is not installed.
    #[serde(default)]
    pub graceful_degradation: GracefulDegradation,
}

fn default_max_iterations() -> u32 {
    2
}

fn default_healing_timeout_minutes() -> u64 {
    10
}

impl Default for SelfHealingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_iterations: default_max_iterations(),
            timeout_minutes: default_healing_timeout_minutes(),
            graceful_degradation: GracefulDegradation::default(),
        }
    }
}

/// What to do when the static-analysis tool is missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GracefulDegradation {
    /// Complete the phase with a fallback note instead of failing.
    #[serde(default = "default_true")]
    pub skip_if_not_installed: bool,
    /// Note recorded in the phase result when the tool is missing.
    #[serde(default = "default_fallback_message")]
    pub fallback_message: String,
}

fn default_true() -> bool {
    true
}

fn default_fallback_message() -> String {
    "static analysis tool not installed; self-healing skipped".to_string()
}

impl Default for GracefulDegradation {
    fn default() -> Self {
        Self {
            skip_if_not_installed: default_true(),
            fallback_message: default_fallback_message(),
        }
    }
}
