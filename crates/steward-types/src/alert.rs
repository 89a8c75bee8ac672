//! Human-facing alerts raised by escalation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::failure::Severity;

/// Delivery channel, chosen by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertChannel {
    /// Immediate action item for the operator.
    ActionItem,
    /// Batched operator notification.
    Email,
    /// Log line only.
    Log,
}

impl AlertChannel {
    pub fn for_severity(severity: Severity) -> Self {
        match severity {
            Severity::Critical => AlertChannel::ActionItem,
            Severity::High | Severity::Medium => AlertChannel::Email,
            Severity::Low => AlertChannel::Log,
        }
    }
}

impl fmt::Display for AlertChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertChannel::ActionItem => write!(f, "action_item"),
            AlertChannel::Email => write!(f, "email"),
            AlertChannel::Log => write!(f, "log"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub severity: Severity,
    pub channel: AlertChannel,
    /// Component that raised the alert ("engine", "health_monitor", ...).
    pub source: String,
    pub title: String,
    pub detail: String,
    pub task_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    /// Deadline for a human response.
    pub respond_by: DateTime<Utc>,
    /// False when the per-minute rate limit held back channel delivery.
    pub delivered: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_note: Option<String>,
}

impl Alert {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}
