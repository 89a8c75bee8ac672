use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors from repository operations (used by trait definitions in steward-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// A task payload or plan that cannot be admitted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("missing field: {0}")]
    MissingField(String),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("invalid plan: {0}")]
    InvalidPlan(String),
}

/// The reasoning collaborator could not produce a usable plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanningError {
    #[error("no planning rule for task kind '{0}'")]
    UnsupportedKind(String),

    #[error("planner produced an empty plan")]
    EmptyPlan,

    #[error("planner failed: {0}")]
    Failed(String),
}

/// A dependency is short-circuited by its breaker; no call was attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit open for dependency '{dependency}' until {retry_after}")]
pub struct CircuitOpenError {
    pub dependency: String,
    /// Earliest instant at which a probe may be admitted.
    pub retry_after: DateTime<Utc>,
}

impl CircuitOpenError {
    /// Time remaining until a probe may be admitted, zero if already past.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.retry_after - now).to_std().unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::InvalidField {
            field: "to".to_string(),
            reason: "not an address".to_string(),
        };
        assert_eq!(err.to_string(), "invalid field 'to': not an address");
    }

    #[test]
    fn test_circuit_open_remaining_saturates() {
        let now = Utc::now();
        let err = CircuitOpenError {
            dependency: "email".to_string(),
            retry_after: now - chrono::Duration::seconds(5),
        };
        assert_eq!(err.remaining(now), Duration::ZERO);

        let err = CircuitOpenError {
            dependency: "email".to_string(),
            retry_after: now + chrono::Duration::seconds(5),
        };
        assert_eq!(err.remaining(now), Duration::from_secs(5));
    }
}
