//! Crash-safe execution state store.
//!
//! One YAML record per story, rewritten in full after every phase
//! transition via a temp-file-and-rename so a crash never leaves a torn
//! record. The record path is a pure function of the story reference, so
//! a restarted process finds the same file and resumes from it.

use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use storyforge_types::execution::ExecutionState;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while persisting or loading run state.
#[derive(Debug, Error)]
pub enum StateError {
    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML encode/decode failure.
    #[error("state codec error: {0}")]
    Codec(String),
}

// ---------------------------------------------------------------------------
// Crash detection
// ---------------------------------------------------------------------------

/// Evidence that a previous run died without reaching a terminal phase.
#[derive(Debug, Clone)]
pub struct CrashInfo {
    /// How long the record has been idle.
    pub idle: Duration,
    /// The phase the run was at when it went quiet.
    pub stalled_phase: String,
}

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

/// Filesystem-backed store for per-story run records.
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The record path for a story reference. Pure and deterministic:
    /// `<dir>/<story-slug>-state.yaml`, where the slug is the lowercased
    /// file stem with non-alphanumeric runs collapsed to `-`.
    pub fn state_file_path(&self, story_ref: &str) -> PathBuf {
        self.dir.join(format!("{}-state.yaml", story_slug(story_ref)))
    }

    /// Load the existing record for a story, if one exists.
    pub fn load(&self, story_ref: &str) -> Result<Option<ExecutionState>, StateError> {
        let path = self.state_file_path(story_ref);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        let state =
            serde_yaml_ng::from_str(&content).map_err(|e| StateError::Codec(e.to_string()))?;
        Ok(Some(state))
    }

    /// Initialize state for a run: rehydrate the existing record verbatim
    /// when `auto_resume` is set, otherwise start fresh at `first_phase`.
    ///
    /// Returns the state and whether it was resumed.
    pub fn initialize(
        &self,
        workflow_id: &str,
        story_ref: &str,
        first_phase: &str,
        auto_resume: bool,
    ) -> Result<(ExecutionState, bool), StateError> {
        if auto_resume {
            if let Some(state) = self.load(story_ref)? {
                tracing::info!(
                    story = story_ref,
                    phase = state.current_phase.as_str(),
                    completed = state.phase_results.len(),
                    "resuming from persisted state"
                );
                return Ok((state, true));
            }
        }
        Ok((ExecutionState::new(workflow_id, story_ref, first_phase), false))
    }

    /// Persist the full record atomically (temp file + rename).
    pub fn save(&self, state: &ExecutionState) -> Result<(), StateError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.state_file_path(&state.current_story);
        let yaml =
            serde_yaml_ng::to_string(state).map_err(|e| StateError::Codec(e.to_string()))?;

        let tmp = path.with_extension("yaml.tmp");
        std::fs::write(&tmp, yaml)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Remove a story's record. Returns `true` if one existed.
    pub fn clear(&self, story_ref: &str) -> Result<bool, StateError> {
        let path = self.state_file_path(story_ref);
        if path.exists() {
            std::fs::remove_file(&path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Flag a record whose `last_updated` is older than `stale_after` and
    /// whose run never reached a terminal phase. The caller combines this
    /// with lock state to decide whether the previous process crashed.
    pub fn detect_crash(state: &ExecutionState, stale_after: Duration) -> Option<CrashInfo> {
        let idle = Utc::now().signed_duration_since(state.last_updated);
        if idle > stale_after {
            Some(CrashInfo {
                idle,
                stalled_phase: state.current_phase.clone(),
            })
        } else {
            None
        }
    }
}

/// Lowercased file stem with non-alphanumeric runs collapsed to `-`.
fn story_slug(story_ref: &str) -> String {
    let stem = Path::new(story_ref)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(story_ref);

    let mut slug = String::with_capacity(stem.len());
    let mut last_dash = false;
    for c in stem.chars() {
        if c.is_ascii_alphanumeric() {
            slug.extend(c.to_lowercase());
            last_dash = false;
        } else if !last_dash && !slug.is_empty() {
            slug.push('-');
            last_dash = true;
        }
    }
    if slug.ends_with('-') {
        slug.pop();
    }
    slug
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use storyforge_types::execution::{PhasePayload, PhaseResult};

    fn sample_state(story: &str) -> ExecutionState {
        let mut state = ExecutionState::new("story-development", story, "1_validation");
        state.executor = "@dev".to_string();
        state.quality_gate = "@architect".to_string();
        state
    }

    // -------------------------------------------------------------------
    // Slug / path
    // -------------------------------------------------------------------

    #[test]
    fn test_state_file_path_is_deterministic() {
        let store = StateStore::new("/tmp/state");
        let a = store.state_file_path("docs/stories/Story 1.2.md");
        let b = store.state_file_path("docs/stories/Story 1.2.md");
        assert_eq!(a, b);
        assert_eq!(a.file_name().unwrap(), "story-1-2-state.yaml");
    }

    #[test]
    fn test_slug_collapses_runs_and_trims() {
        assert_eq!(story_slug("Story  1.2 (draft).md"), "story-1-2-draft");
        assert_eq!(story_slug("simple.md"), "simple");
        assert_eq!(story_slug("UPPER_case.md"), "upper-case");
    }

    // -------------------------------------------------------------------
    // Save / load / resume
    // -------------------------------------------------------------------

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());

        let mut state = sample_state("story-1-2.md");
        state.record_phase(
            "1_validation",
            PhaseResult::completed(PhasePayload::Validation {
                passed: true,
                score: 100,
                issues: vec![],
            }),
        );
        store.save(&state).unwrap();

        let loaded = store.load("story-1-2.md").unwrap().expect("record exists");
        assert_eq!(loaded.workflow_id, "story-development");
        assert_eq!(loaded.current_phase, "1_validation");
        assert!(loaded.phase_completed("1_validation"));
        assert_eq!(loaded.executor, "@dev");
    }

    #[test]
    fn test_initialize_fresh_when_no_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());

        let (state, resumed) = store
            .initialize("story-development", "story-1-2.md", "1_validation", true)
            .unwrap();
        assert!(!resumed);
        assert_eq!(state.current_phase, "1_validation");
        assert!(state.phase_results.is_empty());
    }

    #[test]
    fn test_initialize_resumes_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());

        let mut state = sample_state("story-1-2.md");
        state.attempt_count = 2;
        state.record_phase(
            "2_development",
            PhaseResult::completed(PhasePayload::Spawn {
                output: "done".to_string(),
                output_file: None,
                duration_ms: 10,
            }),
        );
        store.save(&state).unwrap();

        let (resumed_state, resumed) = store
            .initialize("story-development", "story-1-2.md", "1_validation", true)
            .unwrap();
        assert!(resumed);
        assert_eq!(resumed_state.attempt_count, 2);
        assert_eq!(resumed_state.current_phase, "2_development");
        assert!(resumed_state.phase_completed("2_development"));
    }

    #[test]
    fn test_initialize_ignores_record_without_auto_resume() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.save(&sample_state("story-1-2.md")).unwrap();

        let (state, resumed) = store
            .initialize("story-development", "story-1-2.md", "1_validation", false)
            .unwrap();
        assert!(!resumed);
        assert!(state.executor.is_empty());
    }

    #[test]
    fn test_clear_removes_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.save(&sample_state("story-1-2.md")).unwrap();

        assert!(store.clear("story-1-2.md").unwrap());
        assert!(!store.clear("story-1-2.md").unwrap());
        assert!(store.load("story-1-2.md").unwrap().is_none());
    }

    #[test]
    fn test_corrupt_record_is_codec_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(store.state_file_path("story-1-2.md"), "not: [valid").unwrap();

        let err = store.load("story-1-2.md").unwrap_err();
        assert!(matches!(err, StateError::Codec(_)));
    }

    // -------------------------------------------------------------------
    // Crash detection
    // -------------------------------------------------------------------

    #[test]
    fn test_detect_crash_on_stale_record() {
        let mut state = sample_state("story-1-2.md");
        state.last_updated = Utc::now() - Duration::hours(2);
        state.current_phase = "2_development".to_string();

        let crash = StateStore::detect_crash(&state, Duration::minutes(30)).expect("stale");
        assert_eq!(crash.stalled_phase, "2_development");
        assert!(crash.idle >= Duration::hours(2));
    }

    #[test]
    fn test_detect_crash_fresh_record_is_none() {
        let state = sample_state("story-1-2.md");
        assert!(StateStore::detect_crash(&state, Duration::minutes(30)).is_none());
    }
}
