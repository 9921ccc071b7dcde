//! Error types for belief_rrt

use std::fmt;

/// Main error type for planning and policy execution
#[derive(Debug)]
pub enum PlannerError {
    /// A structural invariant was broken: bad tree linkage, index out of
    /// bounds, probability outside [0, 1.001], or an uninitialized state
    InvariantViolation(String),
    /// Caller passed something unusable (empty particle set, bad config)
    InvalidArgument(String),
    /// An injected collaborator misbehaved (empty trajectory, malformed
    /// cluster partition)
    ExternalFailure(String),
}

impl fmt::Display for PlannerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlannerError::InvariantViolation(msg) => write!(f, "Invariant violation: {}", msg),
            PlannerError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            PlannerError::ExternalFailure(msg) => write!(f, "External failure: {}", msg),
        }
    }
}

impl std::error::Error for PlannerError {}

/// Result type alias for planner operations
pub type PlannerResult<T> = Result<T, PlannerError>;
