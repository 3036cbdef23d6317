//! Story metadata extraction from markdown documents.
//!
//! Stories declare their agent assignments in the first fenced ```yaml
//! block of the document. Extraction is a pure parse with no side effects;
//! `load_story_file` adds the filesystem read.

use std::path::Path;

use storyforge_types::story::StoryMetadata;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while reading story metadata.
#[derive(Debug, Error)]
pub enum StoryError {
    /// The document contains no fenced YAML block.
    #[error("story document has no yaml metadata block")]
    MissingMetadataBlock,

    /// The YAML block failed to parse or is missing a required field.
    #[error("invalid story metadata: {0}")]
    InvalidMetadata(String),

    /// Executor and quality gate must be different agents.
    #[error("executor and quality gate must differ (both are '{0}')")]
    SameAgent(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Extract `StoryMetadata` from a story markdown document.
///
/// Reads the first fenced ```yaml block. Missing block, missing required
/// fields, and executor == quality gate are all hard errors -- a run never
/// starts from ambiguous assignments.
pub fn read_story_metadata(content: &str) -> Result<StoryMetadata, StoryError> {
    let block = extract_yaml_block(content).ok_or(StoryError::MissingMetadataBlock)?;
    let meta: StoryMetadata =
        serde_yaml_ng::from_str(block).map_err(|e| StoryError::InvalidMetadata(e.to_string()))?;

    if meta.executor.trim().is_empty() {
        return Err(StoryError::InvalidMetadata(
            "executor must not be empty".to_string(),
        ));
    }
    if meta.quality_gate.trim().is_empty() {
        return Err(StoryError::InvalidMetadata(
            "quality_gate must not be empty".to_string(),
        ));
    }
    if meta.executor == meta.quality_gate {
        return Err(StoryError::SameAgent(meta.executor));
    }
    Ok(meta)
}

/// Load and extract story metadata from a file.
pub fn load_story_file(path: &Path) -> Result<StoryMetadata, StoryError> {
    let content = std::fs::read_to_string(path)?;
    read_story_metadata(&content)
}

/// Find the body of the first fenced ```yaml block.
fn extract_yaml_block(content: &str) -> Option<&str> {
    let start = content.find("```yaml")?;
    let body = &content[start + "```yaml".len()..];
    let body = body.strip_prefix('\n').unwrap_or(body);
    let end = body.find("```")?;
    Some(&body[..end])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
