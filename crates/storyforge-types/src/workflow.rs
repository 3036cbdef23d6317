//! Workflow domain types for Storyforge.
//!
//! Defines the canonical representation of a story-development workflow:
//! an ordered set of phases connected by named edges, plus the error
//! handlers and trigger configuration that surround them. YAML documents
//! parse into `WorkflowDefinition`, which is immutable once loaded.

use std::collections::HashMap;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A complete workflow definition.
///
/// Phases are kept in document order; the first phase in the map is the
/// entry point of the workflow. Edge targets (`on_success` etc.) are plain
/// strings resolved at routing time, so a definition with a dangling edge
/// still loads -- the dangling target surfaces as a failed phase result
/// when (and only when) routing actually reaches it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Stable workflow identifier (e.g. "story-development").
    pub id: String,
    /// Human-readable workflow name.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ordered map of phase key -> phase definition.
    pub phases: PhaseMap,
    /// Named error handlers referenced by `on_failure` edges.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub error_handlers: HashMap<String, ErrorHandlerDefinition>,
    /// Optional trigger configuration (scheduled, event, or manual).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Trigger>,
}

impl WorkflowDefinition {
    /// The key of the workflow's entry phase (first phase in document order).
    pub fn first_phase(&self) -> Option<&str> {
        self.phases.first_key()
    }
}

// ---------------------------------------------------------------------------
// Phase map (insertion-ordered)
// ---------------------------------------------------------------------------

/// An insertion-ordered map of phase key -> `PhaseDefinition`.
///
/// YAML mappings are ordered documents; the order of phase keys determines
/// the workflow entry point and the display order of results. A plain
/// `HashMap` or `BTreeMap` would lose or re-sort that order, so this wraps
/// a `Vec` of pairs with map-shaped serde.
#[derive(Debug, Clone, Default)]
pub struct PhaseMap(Vec<(String, PhaseDefinition)>);

impl PhaseMap {
    pub fn new(entries: Vec<(String, PhaseDefinition)>) -> Self {
        Self(entries)
    }

    /// Look up a phase by its key.
    pub fn get(&self, key: &str) -> Option<&PhaseDefinition> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, p)| p)
    }

    /// The key of the first phase in document order.
    pub fn first_key(&self) -> Option<&str> {
        self.0.first().map(|(k, _)| k.as_str())
    }

    /// Find the key of the phase whose `id` field matches `phase_id`.
    pub fn key_for_id(&self, phase_id: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(_, p)| p.id == phase_id)
            .map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PhaseDefinition)> {
        self.0.iter().map(|(k, p)| (k.as_str(), p))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for PhaseMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, phase) in &self.0 {
            map.serialize_entry(key, phase)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for PhaseMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PhaseMapVisitor;

        impl<'de> Visitor<'de> for PhaseMapVisitor {
            type Value = PhaseMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of phase key to phase definition")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, phase)) = access.next_entry::<String, PhaseDefinition>()? {
                    if entries.iter().any(|(k, _)| k == &key) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate phase key: '{key}'"
                        )));
                    }
                    entries.push((key, phase));
                }
                Ok(PhaseMap(entries))
            }
        }

        deserializer.deserialize_map(PhaseMapVisitor)
    }
}

// ---------------------------------------------------------------------------
// Phase Definition
// ---------------------------------------------------------------------------

/// A single phase of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseDefinition {
    /// Phase type identifier (e.g. "validation", "quality_gate"). Selects
    /// the phase executor; distinct from the map key (e.g. "4_quality_gate").
    pub id: String,
    /// Human-readable phase name.
    pub name: String,
    /// Agent assigned to this phase -- a literal like `@po` or a reference
    /// like `${story.executor}` resolved against run state at dispatch time.
    pub agent: AgentRef,
    /// Task identifier handed to the agent.
    pub task: String,
    /// Optional condition expression; false short-circuits to Skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Whether the agent should be spawned in a visible terminal.
    #[serde(default)]
    pub spawn_in_terminal: bool,
    /// Phase-specific configuration payload.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub config: HashMap<String, serde_json::Value>,
    /// Edge taken when the phase completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<String>,
    /// Edge taken when the phase fails. May name an error handler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<String>,
    /// Edge taken when the phase is skipped. Falls back to `on_success`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_skip: Option<String>,
}

// ---------------------------------------------------------------------------
// Agent reference
// ---------------------------------------------------------------------------

/// An agent slot in a phase definition.
///
/// Serialized as a plain string: `@po` stays a literal, while the exact
/// form `${path}` becomes a reference resolved against run state. No
/// general string interpolation happens -- `prefix-${x}` is a literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentRef {
    /// A concrete agent name, as written (including any `@` prefix).
    Literal(String),
    /// A dotted path into run state, e.g. "story.executor".
    Reference(String),
}

impl AgentRef {
    /// Parse the string form of an agent reference.
    pub fn parse(raw: &str) -> Self {
        if let Some(inner) = raw.strip_prefix("${").and_then(|r| r.strip_suffix('}')) {
            // Only the whole-string `${...}` form is a reference.
            AgentRef::Reference(inner.to_string())
        } else {
            AgentRef::Literal(raw.to_string())
        }
    }
}

impl fmt::Display for AgentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentRef::Literal(name) => f.write_str(name),
            AgentRef::Reference(path) => write!(f, "${{{path}}}"),
        }
    }
}

impl Serialize for AgentRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AgentRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(AgentRef::parse(&raw))
    }
}

// ---------------------------------------------------------------------------
// Route targets
// ---------------------------------------------------------------------------

/// A resolved routing edge target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    /// Terminal sentinel: workflow suspended, resumable later.
    Paused,
    /// Terminal sentinel: workflow abandoned.
    Aborted,
    /// A phase key (or error handler id) to route to.
    Named(String),
}

/// Sentinel edge value for a paused workflow.
pub const ROUTE_PAUSED: &str = "workflow_paused";

/// Sentinel edge value for an aborted workflow.
pub const ROUTE_ABORTED: &str = "workflow_aborted";

impl RouteTarget {
    pub fn parse(raw: &str) -> Self {
        match raw {
            ROUTE_PAUSED => RouteTarget::Paused,
            ROUTE_ABORTED => RouteTarget::Aborted,
            other => RouteTarget::Named(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Error handlers
// ---------------------------------------------------------------------------

/// A named error handler attached to `on_failure` edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorHandlerDefinition {
    /// What this handler is for.
    pub description: String,
    /// Actions executed in order when the handler fires.
    pub actions: Vec<HandlerAction>,
}

/// A single error-handler action.
///
/// YAML shape: bare keyword (`- increment_attempt`) or single-key map
/// (`- log: "..."`, `- max_attempts: 3`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerAction {
    /// Emit a log line with the given message.
    Log(String),
    /// Bump the run's attempt counter.
    IncrementAttempt,
    /// Gate retry on the attempt counter: below the limit the handler
    /// retries, at or above it the handler escalates.
    MaxAttempts(u32),
}

impl Serialize for HandlerAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            HandlerAction::Log(msg) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("log", msg)?;
                map.end()
            }
            HandlerAction::IncrementAttempt => serializer.serialize_str("increment_attempt"),
            HandlerAction::MaxAttempts(n) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("max_attempts", n)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for HandlerAction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ActionVisitor;

        impl<'de> Visitor<'de> for ActionVisitor {
            type Value = HandlerAction;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a handler action keyword or single-key map")
            }

            fn visit_str<E: serde::de::Error>(self, value: &str) -> Result<Self::Value, E> {
                match value {
                    "increment_attempt" => Ok(HandlerAction::IncrementAttempt),
                    other => Err(E::custom(format!("unknown handler action: '{other}'"))),
                }
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let key: String = access
                    .next_key()?
                    .ok_or_else(|| serde::de::Error::custom("empty handler action map"))?;
                let action = match key.as_str() {
                    "log" => HandlerAction::Log(access.next_value()?),
                    "max_attempts" => HandlerAction::MaxAttempts(access.next_value()?),
                    "increment_attempt" => {
                        let _: Option<serde_json::Value> = access.next_value()?;
                        HandlerAction::IncrementAttempt
                    }
                    other => {
                        return Err(serde::de::Error::custom(format!(
                            "unknown handler action: '{other}'"
                        )));
                    }
                };
                if access.next_key::<String>()?.is_some() {
                    return Err(serde::de::Error::custom(
                        "handler action map must have exactly one key",
                    ));
                }
                Ok(action)
            }
        }

        deserializer.deserialize_any(ActionVisitor)
    }
}

// ---------------------------------------------------------------------------
// Triggers
// ---------------------------------------------------------------------------

/// How a workflow is started.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Calendar trigger: a cron expression with a mandatory timezone.
    Scheduled {
        /// Cron expression (5-field standard or 6-field with seconds).
        schedule: String,
        /// IANA timezone name (e.g. "America/Sao_Paulo"). Required:
        /// scheduled workflows never run in an implicit server timezone.
        timezone: String,
    },
    /// Event trigger: fires when a named event is emitted.
    OnEvent {
        /// Event name to match.
        event: String,
        /// Optional event source filter.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
    },
    /// Manually triggered via CLI or API only.
    Manual,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SIX_PHASE_YAML: &str = r#"
id: story-development
name: Story Development Cycle
phases:
  1_validation:
    id: validation
    name: Validate Story
    agent: "@po"
    task: validate-story
    on_success: 2_development
    on_failure: reject_with_feedback
  2_development:
    id: development
    name: Implement Story
    agent: "${story.executor}"
    task: implement-story
    spawn_in_terminal: true
    on_success: 3_self_healing
    on_failure: escalate_to_human
  3_self_healing:
    id: self_healing
    name: Self Healing
    agent: "@dev"
    task: run-analysis
    condition: "${config.self_healing.enabled} == true"
    on_success: 4_quality_gate
    on_skip: 4_quality_gate
error_handlers:
  return_to_development:
    description: Send the story back to development
    actions:
      - log: "Quality gate failed"
      - increment_attempt
      - max_attempts: 3
trigger:
  type: scheduled
  schedule: "0 7 * * *"
  timezone: "America/Sao_Paulo"
"#;

    #[test]
    fn test_parse_workflow_yaml() {
        let def: WorkflowDefinition = serde_yaml_ng::from_str(SIX_PHASE_YAML).unwrap();
        assert_eq!(def.id, "story-development");
        assert_eq!(def.phases.len(), 3);
        assert_eq!(def.first_phase(), Some("1_validation"));

        let dev = def.phases.get("2_development").unwrap();
        assert_eq!(
            dev.agent,
            AgentRef::Reference("story.executor".to_string())
        );
        assert!(dev.spawn_in_terminal);
        assert_eq!(dev.on_success.as_deref(), Some("3_self_healing"));
    }

    #[test]
    fn test_phase_map_preserves_document_order() {
        let def: WorkflowDefinition = serde_yaml_ng::from_str(SIX_PHASE_YAML).unwrap();
        let keys: Vec<&str> = def.phases.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["1_validation", "2_development", "3_self_healing"]);
    }

    #[test]
    fn test_phase_map_rejects_duplicate_keys() {
        let yaml = r#"
1_validation:
  id: validation
  name: A
  agent: "@po"
  task: t
1_validation:
  id: validation
  name: B
  agent: "@po"
  task: t
"#;
        let result: Result<PhaseMap, _> = serde_yaml_ng::from_str(yaml);
        assert!(result.is_err());
    }

    #[test]
    fn test_phase_map_key_for_id() {
        let def: WorkflowDefinition = serde_yaml_ng::from_str(SIX_PHASE_YAML).unwrap();
        assert_eq!(def.phases.key_for_id("development"), Some("2_development"));
        assert_eq!(def.phases.key_for_id("nonexistent"), None);
    }

    // -----------------------------------------------------------------------
    // AgentRef
    // -----------------------------------------------------------------------

    #[test]
    fn test_agent_ref_literal() {
        assert_eq!(AgentRef::parse("@po"), AgentRef::Literal("@po".to_string()));
        assert_eq!(AgentRef::parse("dev"), AgentRef::Literal("dev".to_string()));
    }

    #[test]
    fn test_agent_ref_reference() {
        assert_eq!(
            AgentRef::parse("${story.executor}"),
            AgentRef::Reference("story.executor".to_string())
        );
    }

    #[test]
    fn test_agent_ref_partial_interpolation_is_literal() {
        // Only whole-string `${...}` is a reference.
        assert_eq!(
            AgentRef::parse("agent-${story.executor}"),
            AgentRef::Literal("agent-${story.executor}".to_string())
        );
    }

    #[test]
    fn test_agent_ref_display_roundtrip() {
        for raw in ["@po", "${story.quality_gate}", "plain"] {
            let parsed = AgentRef::parse(raw);
            assert_eq!(parsed.to_string(), raw);
            let reparsed = AgentRef::parse(&parsed.to_string());
            assert_eq!(reparsed, parsed);
        }
    }

    // -----------------------------------------------------------------------
    // RouteTarget
    // -----------------------------------------------------------------------

    #[test]
    fn test_route_target_sentinels() {
        assert_eq!(RouteTarget::parse("workflow_paused"), RouteTarget::Paused);
        assert_eq!(RouteTarget::parse("workflow_aborted"), RouteTarget::Aborted);
        assert_eq!(
            RouteTarget::parse("2_development"),
            RouteTarget::Named("2_development".to_string())
        );
    }

    // -----------------------------------------------------------------------
    // HandlerAction
    // -----------------------------------------------------------------------

    #[test]
    fn test_handler_action_yaml_shapes() {
        let yaml = r#"
- log: "Quality gate failed"
- increment_attempt
- max_attempts: 3
"#;
        let actions: Vec<HandlerAction> = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(
            actions,
            vec![
                HandlerAction::Log("Quality gate failed".to_string()),
                HandlerAction::IncrementAttempt,
                HandlerAction::MaxAttempts(3),
            ]
        );
    }

    #[test]
    fn test_handler_action_unknown_keyword_rejected() {
        let result: Result<HandlerAction, _> = serde_yaml_ng::from_str("explode");
        assert!(result.is_err());
    }

    #[test]
    fn test_handler_action_serialize_roundtrip() {
        let actions = vec![
            HandlerAction::Log("msg".to_string()),
            HandlerAction::IncrementAttempt,
            HandlerAction::MaxAttempts(2),
        ];
        let yaml = serde_yaml_ng::to_string(&actions).unwrap();
        let parsed: Vec<HandlerAction> = serde_yaml_ng::from_str(&yaml).unwrap();
        assert_eq!(parsed, actions);
    }

    // -----------------------------------------------------------------------
    // Trigger
    // -----------------------------------------------------------------------

    #[test]
    fn test_trigger_scheduled_serde() {
        let trigger = Trigger::Scheduled {
            schedule: "0 7 * * *".to_string(),
            timezone: "America/Sao_Paulo".to_string(),
        };
        let json = serde_json::to_string(&trigger).unwrap();
        assert!(json.contains("\"type\":\"scheduled\""));
        let parsed: Trigger = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, Trigger::Scheduled { .. }));
    }

    #[test]
    fn test_trigger_scheduled_requires_timezone() {
        let yaml = r#"
type: scheduled
schedule: "0 7 * * *"
"#;
        let result: Result<Trigger, _> = serde_yaml_ng::from_str(yaml);
        assert!(result.is_err(), "timezone must be mandatory");
    }

    #[test]
    fn test_trigger_on_event_serde() {
        let trigger = Trigger::OnEvent {
            event: "story_approved".to_string(),
            source: Some("review-board".to_string()),
        };
        let json = serde_json::to_string(&trigger).unwrap();
        assert!(json.contains("\"type\":\"on_event\""));
        let parsed: Trigger = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, Trigger::OnEvent { .. }));
    }

    #[test]
    fn test_trigger_manual_serde() {
        let json = serde_json::to_string(&Trigger::Manual).unwrap();
        assert!(json.contains("\"type\":\"manual\""));
        let parsed: Trigger = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, Trigger::Manual));
    }
}
