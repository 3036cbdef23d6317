//! Shared domain types for Storyforge.
//!
//! This crate contains the core domain types used across the Storyforge
//! engine: workflow definitions, phase execution records, story metadata,
//! engine configuration, and scheduler bookkeeping types.
//!
//! Zero infrastructure dependencies -- only serde, serde_json, chrono.

pub mod config;
pub mod execution;
pub mod scheduler;
pub mod story;
pub mod workflow;
