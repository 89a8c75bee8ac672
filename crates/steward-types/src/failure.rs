//! Failure classification types: error kinds, severities, and error records.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// How urgently a human must react. Ordering is "most severe first".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Target time for a human to respond to an alert of this severity.
    pub fn response_target(&self) -> Duration {
        match self {
            Severity::Critical => Duration::ZERO,
            Severity::High => Duration::from_secs(60 * 60),
            Severity::Medium => Duration::from_secs(4 * 60 * 60),
            Severity::Low => Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Recovery time objective for the affected service.
    pub fn recovery_objective(&self) -> Duration {
        match self {
            Severity::Critical => Duration::from_secs(5 * 60),
            Severity::High => Duration::from_secs(15 * 60),
            Severity::Medium => Duration::from_secs(60 * 60),
            Severity::Low => Duration::from_secs(4 * 60 * 60),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Critical => write!(f, "critical"),
            Severity::High => write!(f, "high"),
            Severity::Medium => write!(f, "medium"),
            Severity::Low => write!(f, "low"),
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(Severity::Critical),
            "high" => Ok(Severity::High),
            "medium" => Ok(Severity::Medium),
            "low" => Ok(Severity::Low),
            other => Err(format!("invalid severity: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Classified kind of an external-call failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Timeout,
    Authentication,
    Permission,
    ResourceExhaustion,
    DataIntegrity,
    /// Failure that matched no classification rule.
    Unknown,
}

impl ErrorKind {
    pub fn default_severity(&self) -> Severity {
        match self {
            ErrorKind::Connection => Severity::High,
            ErrorKind::Timeout => Severity::Medium,
            ErrorKind::Authentication => Severity::Critical,
            ErrorKind::Permission => Severity::High,
            ErrorKind::ResourceExhaustion => Severity::Critical,
            ErrorKind::DataIntegrity => Severity::Medium,
            ErrorKind::Unknown => Severity::High,
        }
    }

    /// Retryable locally with backoff. Authentication is retryable only
    /// after a successful credential refresh.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Connection
                | ErrorKind::Timeout
                | ErrorKind::Authentication
                | ErrorKind::ResourceExhaustion
        )
    }

    /// Never retried; escalated to a human immediately.
    pub fn requires_human(&self) -> bool {
        matches!(self, ErrorKind::Permission | ErrorKind::DataIntegrity)
    }

    /// Dependency-wide failures that count toward the circuit breaker.
    pub fn trips_breaker(&self) -> bool {
        matches!(
            self,
            ErrorKind::Connection | ErrorKind::Timeout | ErrorKind::ResourceExhaustion
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Permission => "permission",
            ErrorKind::ResourceExhaustion => "resource_exhaustion",
            ErrorKind::DataIntegrity => "data_integrity",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "connection" => Ok(ErrorKind::Connection),
            "timeout" => Ok(ErrorKind::Timeout),
            "authentication" | "auth" => Ok(ErrorKind::Authentication),
            "permission" => Ok(ErrorKind::Permission),
            "resource_exhaustion" => Ok(ErrorKind::ResourceExhaustion),
            "data_integrity" => Ok(ErrorKind::DataIntegrity),
            "unknown" => Ok(ErrorKind::Unknown),
            other => Err(format!("invalid error kind: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// ErrorRecord
// ---------------------------------------------------------------------------

/// One observed failure. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: Uuid,
    /// Component or dependency id the failure came from.
    pub dependency: String,
    pub kind: ErrorKind,
    pub severity: Severity,
    pub message: String,
    pub task_id: Option<Uuid>,
    pub step_index: Option<u32>,
    /// Zero-based attempt number of the failing call.
    pub attempt: u32,
    pub occurred_at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(
        dependency: impl Into<String>,
        kind: ErrorKind,
        message: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            dependency: dependency.into(),
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            task_id: None,
            step_index: None,
            attempt: 0,
            occurred_at,
        }
    }

    pub fn for_step(mut self, task_id: Uuid, step_index: u32, attempt: u32) -> Self {
        self.task_id = Some(task_id);
        self.step_index = Some(step_index);
        self.attempt = attempt;
        self
    }
}
