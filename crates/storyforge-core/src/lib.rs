//! Workflow engine and trigger layer for Storyforge.
//!
//! This crate defines the engine "ports" (spawn capability, lock manager,
//! static analyzer, workflow launcher) as traits and drives story-development
//! workflows through them. It depends only on `storyforge-types` -- never on
//! process-spawning or terminal infrastructure directly.

pub mod workflow;
