//! Workflow engine core: definition loading, phase execution, durable
//! per-story state, and the trigger layer.
//!
//! - `definition` -- YAML parsing and structural validation
//! - `story` -- story metadata extraction from markdown documents
//! - `condition` -- minimal dotted-path equality condition evaluator
//! - `spawn` / `lock` / `analysis` -- engine ports implemented by callers
//! - `phases` -- per-phase executors (validation through checkpoint)
//! - `state` -- crash-safe YAML state store with resume support
//! - `handler` -- named error handlers with retry/escalation
//! - `executor` -- the sequential driver loop
//! - `log` -- rolling execution history for the trigger layer
//! - `scheduler` -- scheduled/event/manual trigger dispatch

pub mod analysis;
pub mod condition;
pub mod definition;
pub mod executor;
pub mod handler;
pub mod lock;
pub mod log;
pub mod phases;
pub mod scheduler;
pub mod spawn;
pub mod state;
pub mod story;
