//! Story metadata extracted from story markdown documents.

use serde::{Deserialize, Serialize};

/// Agent assignments declared in a story's fenced YAML metadata block.
///
/// `executor` and `quality_gate` are required and must name different
/// agents; the reader enforces both before a run starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryMetadata {
    /// Agent that implements the story (e.g. "@dev").
    pub executor: String,
    /// Agent that reviews the implementation. Must differ from `executor`.
    pub quality_gate: String,
    /// Analysis tools the quality gate may use.
    #[serde(default)]
    pub quality_gate_tools: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_story_metadata_yaml() {
        let yaml = r#"
executor: "@dev"
quality_gate: "@architect"
quality_gate_tools:
  - codeql
"#;
        let meta: StoryMetadata = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(meta.executor, "@dev");
        assert_eq!(meta.quality_gate, "@architect");
        assert_eq!(meta.quality_gate_tools, vec!["codeql"]);
    }

    #[test]
    fn test_story_metadata_tools_default_empty() {
        let yaml = r#"
executor: "@dev"
quality_gate: "@qa"
"#;
        let meta: StoryMetadata = serde_yaml_ng::from_str(yaml).unwrap();
        assert!(meta.quality_gate_tools.is_empty());
    }

    #[test]
    fn test_story_metadata_missing_executor_rejected() {
        let yaml = "quality_gate: \"@qa\"";
        let result: Result<StoryMetadata, _> = serde_yaml_ng::from_str(yaml);
        assert!(result.is_err());
    }
}
