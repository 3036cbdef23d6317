//! Minimal condition evaluator for phase `condition` expressions.
//!
//! The supported grammar is deliberately small: a dotted path compared for
//! equality against a literal, e.g.
//!
//! ```text
//! ${config.self_healing.enabled} == true
//! ${state.attempt_count} == 0
//! ```
//!
//! Anything richer (other operators, boolean connectives) is rejected with
//! `ConditionError::Unsupported` rather than silently misevaluated. Paths
//! that do not exist in the scope evaluate unequal, not as errors.

use serde_json::Value;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while parsing a condition expression.
#[derive(Debug, Error)]
pub enum ConditionError {
    /// The expression uses an operator or form outside the grammar.
    #[error("unsupported condition expression: {0}")]
    Unsupported(String),

    /// The expression is malformed (empty path or literal).
    #[error("malformed condition expression: {0}")]
    Malformed(String),
}

// ---------------------------------------------------------------------------
// Condition
// ---------------------------------------------------------------------------

/// A parsed `<path> == <literal>` condition.
#[derive(Debug, Clone)]
pub struct Condition {
    path: Vec<String>,
    literal: Value,
    raw: String,
}

impl Condition {
    /// Parse a condition expression.
    pub fn parse(expr: &str) -> Result<Self, ConditionError> {
        let trimmed = expr.trim();

        // Reject richer grammar up front so it never misevaluates.
        for forbidden in ["!=", "&&", "||", "<", ">"] {
            if trimmed.contains(forbidden) {
                return Err(ConditionError::Unsupported(trimmed.to_string()));
            }
        }

        let (lhs, rhs) = trimmed
            .split_once("==")
            .ok_or_else(|| ConditionError::Unsupported(trimmed.to_string()))?;
        if rhs.contains("==") {
            return Err(ConditionError::Unsupported(trimmed.to_string()));
        }

        let path_str = lhs.trim();
        let path_str = path_str
            .strip_prefix("${")
            .and_then(|p| p.strip_suffix('}'))
            .unwrap_or(path_str);
        if path_str.is_empty() {
            return Err(ConditionError::Malformed(trimmed.to_string()));
        }
        let path: Vec<String> = path_str.split('.').map(str::to_string).collect();
        if path.iter().any(String::is_empty) {
            return Err(ConditionError::Malformed(trimmed.to_string()));
        }

        let literal = parse_literal(rhs.trim())
            .ok_or_else(|| ConditionError::Malformed(trimmed.to_string()))?;

        Ok(Self {
            path,
            literal,
            raw: trimmed.to_string(),
        })
    }

    /// The expression as written (trimmed), for skip-reason messages.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Evaluate against a JSON scope. Missing paths compare unequal.
    pub fn evaluate(&self, scope: &Value) -> bool {
        let mut current = scope;
        for segment in &self.path {
            match current.get(segment) {
                Some(next) => current = next,
                None => return false,
            }
        }
        values_equal(current, &self.literal)
    }
}

/// Parse the right-hand literal: bool, number, or (optionally quoted) string.
fn parse_literal(raw: &str) -> Option<Value> {
    if raw.is_empty() {
        return None;
    }
    match raw {
        "true" => return Some(Value::Bool(true)),
        "false" => return Some(Value::Bool(false)),
        _ => {}
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Some(Value::from(n));
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Some(Value::from(f));
    }
    let unquoted = raw
        .strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .or_else(|| raw.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')))
        .unwrap_or(raw);
    Some(Value::String(unquoted.to_string()))
}

/// Equality with numeric tolerance across integer/float JSON encodings.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
