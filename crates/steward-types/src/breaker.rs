//! Persisted circuit breaker state, one record per external dependency.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests pass through; failures are counted within a rolling window.
    Closed,
    /// Requests short-circuit until the cooldown elapses.
    Open,
    /// Exactly one probe request is admitted.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub dependency: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Start of the current failure-counting window.
    pub window_started_at: Option<DateTime<Utc>>,
    pub last_transition_at: DateTime<Utc>,
    pub opened_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl CircuitBreakerState {
    pub fn closed(dependency: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            dependency: dependency.into(),
            state: CircuitState::Closed,
            consecutive_failures: 0,
            window_started_at: None,
            last_transition_at: now,
            opened_at: None,
            last_error: None,
        }
    }
}
