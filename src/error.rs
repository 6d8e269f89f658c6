//! Error kinds surfaced by the planner and executor (spec.md §7).

use thiserror::Error;

/// Errors that can occur while parsing, planning, or executing a query.
#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("parse error at position {position}: {message}")]
    ParseError { position: usize, message: String },

    /// Unbound alias referenced in WHERE or RETURN, or an inconsistent
    /// pattern (e.g. an edge whose endpoint was never declared).
    #[error("planning error: {0}")]
    PlanningError(String),

    /// A `reset` failed, or a storage-layer call failed mid-execution.
    #[error("execution error: {0}")]
    ExecutionError(String),

    #[error("type error: expected {expected}, found {found}")]
    TypeError { expected: String, found: String },

    #[error("unknown variable: {0}")]
    UnknownVariable(String),
}

pub type Result<T> = std::result::Result<T, PlannerError>;
