//! Approval gate types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalStatus::Pending => write!(f, "pending"),
            ApprovalStatus::Approved => write!(f, "approved"),
            ApprovalStatus::Rejected => write!(f, "rejected"),
            ApprovalStatus::Expired => write!(f, "expired"),
        }
    }
}

/// A human-in-the-loop gate on a task. At most one is pending per task;
/// once resolved it never changes again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub task_id: Uuid,
    pub action_summary: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: ApprovalStatus,
    /// Replacement payload supplied by the approver.
    pub edits: Option<Value>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    pub fn new(
        task_id: Uuid,
        action_summary: impl Into<String>,
        created_at: DateTime<Utc>,
        window: chrono::Duration,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            task_id,
            action_summary: action_summary.into(),
            created_at,
            expires_at: created_at + window,
            status: ApprovalStatus::Pending,
            edits: None,
            decided_at: None,
        }
    }

    /// Pending and past its deadline (the deadline itself counts as expired).
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == ApprovalStatus::Pending && now >= self.expires_at
    }
}

/// A human decision on a pending approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum ApprovalDecision {
    Approve {
        #[serde(default)]
        edits: Option<Value>,
    },
    Reject {
        #[serde(default)]
        reason: Option<String>,
    },
}

impl ApprovalDecision {
    pub fn approve() -> Self {
        ApprovalDecision::Approve { edits: None }
    }

    pub fn reject() -> Self {
        ApprovalDecision::Reject { reason: None }
    }
}
