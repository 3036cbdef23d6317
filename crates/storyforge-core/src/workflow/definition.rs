//! Workflow definition parsing, validation, and filesystem operations.
//!
//! Workflow documents nest the definition under a `workflow:` root key.
//! Structural validation is deliberately light: edge targets are not
//! checked against the phase map here, because dangling edges surface as
//! failed phase results at routing time rather than load failures.

use std::path::Path;

use storyforge_types::workflow::WorkflowDefinition;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while loading a workflow definition.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// YAML parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    Validation(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// The document shape: the definition lives under a `workflow:` root key.
#[derive(serde::Deserialize)]
struct WorkflowDocument {
    workflow: WorkflowDefinition,
}

/// Parse a YAML document into a validated `WorkflowDefinition`.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, DefinitionError> {
    let doc: WorkflowDocument =
        serde_yaml_ng::from_str(yaml).map_err(|e| DefinitionError::Parse(e.to_string()))?;
    validate_definition(&doc.workflow)?;
    Ok(doc.workflow)
}

/// Load a workflow definition from a YAML file.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, DefinitionError> {
    let content = std::fs::read_to_string(path)?;
    parse_workflow_yaml(&content)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// Checks:
/// - Id and name are non-empty
/// - At least one phase exists
/// - Every phase has a non-empty `id` and `task`
///
/// Edge targets are intentionally NOT validated here.
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), DefinitionError> {
    if def.id.is_empty() {
        return Err(DefinitionError::Validation(
            "workflow id must not be empty".to_string(),
        ));
    }
    if def.name.is_empty() {
        return Err(DefinitionError::Validation(
            "workflow name must not be empty".to_string(),
        ));
    }
    if def.phases.is_empty() {
        return Err(DefinitionError::Validation(
            "workflow must have at least one phase".to_string(),
        ));
    }
    for (key, phase) in def.phases.iter() {
        if phase.id.is_empty() {
            return Err(DefinitionError::Validation(format!(
                "phase '{key}' has an empty id"
            )));
        }
        if phase.task.is_empty() {
            return Err(DefinitionError::Validation(format!(
                "phase '{key}' has an empty task"
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_YAML: &str = r#"
workflow:
  id: story-development
  name: Story Development Cycle
  phases:
    1_validation:
      id: validation
      name: Validate Story
      agent: "@po"
      task: validate-story
      on_success: 2_development
    2_development:
      id: development
      name: Implement Story
      agent: "${story.executor}"
      task: implement-story
"#;

    #[test]
    fn test_parse_minimal_document() {
        let def = parse_workflow_yaml(MINIMAL_YAML).expect("should parse");
        assert_eq!(def.id, "story-development");
        assert_eq!(def.phases.len(), 2);
        assert_eq!(def.first_phase(), Some("1_validation"));
    }

    #[test]
    fn test_parse_rejects_missing_workflow_root() {
        let yaml = "id: story-development\nname: x\nphases: {}";
        let err = parse_workflow_yaml(yaml).unwrap_err();
        assert!(matches!(err, DefinitionError::Parse(_)));
    }

    #[test]
    fn test_parse_rejects_empty_phases() {
        let yaml = r#"
workflow:
  id: wf
  name: Workflow
  phases: {}
"#;
        let err = parse_workflow_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("at least one phase"));
    }

    #[test]
    fn test_parse_rejects_empty_task() {
        let yaml = r#"
workflow:
  id: wf
  name: Workflow
  phases:
    1_validation:
      id: validation
      name: Validate
      agent: "@po"
      task: ""
"#;
        let err = parse_workflow_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("empty task"));
    }

    #[test]
    fn test_dangling_edge_target_still_loads() {
        let yaml = r#"
workflow:
  id: wf
  name: Workflow
  phases:
    1_validation:
      id: validation
      name: Validate
      agent: "@po"
      task: validate-story
      on_success: 99_nonexistent
"#;
        // Edge targets resolve at routing time, not load time.
        let def = parse_workflow_yaml(yaml).expect("dangling edges load fine");
        assert_eq!(
            def.phases.get("1_validation").unwrap().on_success.as_deref(),
            Some("99_nonexistent")
        );
    }

    #[test]
    fn test_load_workflow_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workflow.yaml");
        std::fs::write(&path, MINIMAL_YAML).unwrap();

        let def = load_workflow_file(&path).expect("should load");
        assert_eq!(def.id, "story-development");
    }
}
