//! Task domain types: the unit of work moving through the lifecycle.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ValidationError;

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a task.
///
/// ```text
/// NEW -> PLANNED -> PENDING_APPROVAL -> APPROVED -> IN_PROGRESS -> DONE
///          \_____________________________/^            |
///                                                      +-> FAILED -> ESCALATED
///                                                      +-> ESCALATED
/// PENDING_APPROVAL -> REJECTED | EXPIRED
/// NEW -> FAILED (planning or validation failure)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    New,
    Planned,
    PendingApproval,
    Approved,
    InProgress,
    Done,
    Rejected,
    Expired,
    Failed,
    Escalated,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 10] = [
        TaskStatus::New,
        TaskStatus::Planned,
        TaskStatus::PendingApproval,
        TaskStatus::Approved,
        TaskStatus::InProgress,
        TaskStatus::Done,
        TaskStatus::Rejected,
        TaskStatus::Expired,
        TaskStatus::Failed,
        TaskStatus::Escalated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::New => "new",
            TaskStatus::Planned => "planned",
            TaskStatus::PendingApproval => "pending_approval",
            TaskStatus::Approved => "approved",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Rejected => "rejected",
            TaskStatus::Expired => "expired",
            TaskStatus::Failed => "failed",
            TaskStatus::Escalated => "escalated",
        }
    }

    /// Terminal states never transition again (except FAILED -> ESCALATED).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Done
                | TaskStatus::Rejected
                | TaskStatus::Expired
                | TaskStatus::Failed
                | TaskStatus::Escalated
        )
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (New, Planned)
                | (New, Failed)
                | (Planned, PendingApproval)
                | (Planned, Approved)
                | (PendingApproval, Approved)
                | (PendingApproval, Rejected)
                | (PendingApproval, Expired)
                | (Approved, InProgress)
                | (InProgress, Done)
                | (InProgress, Failed)
                | (InProgress, Escalated)
                | (Failed, Escalated)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.to_lowercase().replace('-', "_");
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| format!("invalid task status: '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// TaskPriority
// ---------------------------------------------------------------------------

/// Scheduling priority. Ordering is "most urgent first": `Critical < Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl TaskPriority {
    /// Numeric rank used for ordering in storage (0 = dequeued first).
    pub fn rank(&self) -> i64 {
        match self {
            TaskPriority::Critical => 0,
            TaskPriority::High => 1,
            TaskPriority::Medium => 2,
            TaskPriority::Low => 3,
        }
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Medium
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskPriority::Critical => write!(f, "critical"),
            TaskPriority::High => write!(f, "high"),
            TaskPriority::Medium => write!(f, "medium"),
            TaskPriority::Low => write!(f, "low"),
        }
    }
}

impl FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(TaskPriority::Critical),
            "high" => Ok(TaskPriority::High),
            "medium" => Ok(TaskPriority::Medium),
            "low" => Ok(TaskPriority::Low),
            other => Err(format!("invalid task priority: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// TaskPayload
// ---------------------------------------------------------------------------

/// Structured task payload: a tagged union over the known task kinds with an
/// `Opaque` fallback for kinds the orchestrator does not understand natively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskPayload {
    Email {
        to: String,
        subject: String,
        body: String,
    },
    SocialPost {
        platform: String,
        content: String,
    },
    Accounting {
        operation: String,
        amount: f64,
        reference: String,
    },
    FileDrop {
        path: String,
    },
    Opaque {
        kind: String,
        data: Value,
    },
}

/// Task kinds with a dedicated payload variant.
const KNOWN_KINDS: [&str; 4] = ["email", "social_post", "accounting", "file_drop"];

/// Longest social post body accepted at admission.
const MAX_SOCIAL_CONTENT_CHARS: usize = 5_000;

impl TaskPayload {
    /// Build a payload from a producer-supplied kind and free-form document.
    ///
    /// Known kinds must carry an object with the variant's fields; any other
    /// kind is wrapped as `Opaque`.
    pub fn from_parts(kind: &str, data: Value) -> Result<Self, ValidationError> {
        let kind = kind.trim();
        if kind.is_empty() {
            return Err(ValidationError::MissingField("kind".to_string()));
        }
        if !KNOWN_KINDS.contains(&kind) {
            return Ok(TaskPayload::Opaque {
                kind: kind.to_string(),
                data,
            });
        }

        let Value::Object(mut map) = data else {
            return Err(ValidationError::Malformed(format!(
                "payload for '{kind}' must be an object"
            )));
        };
        map.insert("type".to_string(), Value::String(kind.to_string()));
        serde_json::from_value(Value::Object(map))
            .map_err(|e| ValidationError::Malformed(format!("{kind}: {e}")))
    }

    pub fn kind(&self) -> &str {
        match self {
            TaskPayload::Email { .. } => "email",
            TaskPayload::SocialPost { .. } => "social_post",
            TaskPayload::Accounting { .. } => "accounting",
            TaskPayload::FileDrop { .. } => "file_drop",
            TaskPayload::Opaque { kind, .. } => kind,
        }
    }

    /// Field-level checks applied at admission and after approval edits.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            TaskPayload::Email { to, subject, .. } => {
                require_non_empty("to", to)?;
                require_non_empty("subject", subject)?;
                let valid_address = to
                    .split_once('@')
                    .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
                if !valid_address {
                    return Err(invalid("to", "not an email address"));
                }
            }
            TaskPayload::SocialPost { platform, content } => {
                require_non_empty("platform", platform)?;
                require_non_empty("content", content)?;
                if content.chars().count() > MAX_SOCIAL_CONTENT_CHARS {
                    return Err(invalid("content", "exceeds 5000 characters"));
                }
            }
            TaskPayload::Accounting {
                operation,
                amount,
                reference,
            } => {
                require_non_empty("operation", operation)?;
                require_non_empty("reference", reference)?;
                if !amount.is_finite() {
                    return Err(invalid("amount", "must be a finite number"));
                }
            }
            TaskPayload::FileDrop { path } => require_non_empty("path", path)?,
            TaskPayload::Opaque { kind, data } => {
                require_non_empty("kind", kind)?;
                if data.is_null() {
                    return Err(ValidationError::MissingField("data".to_string()));
                }
            }
        }
        Ok(())
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::MissingField(field.to_string()))
    } else {
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ValidationError {
    ValidationError::InvalidField {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

// ---------------------------------------------------------------------------
// PlanStep
// ---------------------------------------------------------------------------

/// One step of a task plan, executed by the connector registered for `action`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub name: String,
    /// Connector action key (e.g. "email.send").
    pub action: String,
    /// External dependency id guarded by a circuit breaker.
    pub dependency: String,
    #[serde(default)]
    pub input: Value,
    /// Steps with irreversible external effects require human approval.
    #[serde(default)]
    pub irreversible: bool,
}

impl PlanStep {
    pub fn new(name: impl Into<String>, action: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: action.into(),
            dependency: dependency.into(),
            input: Value::Null,
            irreversible: false,
        }
    }

    pub fn irreversible(mut self) -> Self {
        self.irreversible = true;
        self
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }
}

/// Structural checks on a plan before it is attached to a task.
pub fn validate_plan(plan: &[PlanStep]) -> Result<(), ValidationError> {
    if plan.is_empty() {
        return Err(ValidationError::InvalidPlan("plan has no steps".to_string()));
    }
    for (index, step) in plan.iter().enumerate() {
        if step.name.trim().is_empty() {
            return Err(ValidationError::InvalidPlan(format!("step {index} has no name")));
        }
        if step.action.trim().is_empty() {
            return Err(ValidationError::InvalidPlan(format!(
                "step '{}' has no action",
                step.name
            )));
        }
        if step.dependency.trim().is_empty() {
            return Err(ValidationError::InvalidPlan(format!(
                "step '{}' has no dependency",
                step.name
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A unit of autonomous work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub kind: String,
    pub payload: TaskPayload,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub approval_required: bool,
    /// Consecutive failed attempts of the current step.
    pub retry_count: u32,
    /// Worker currently holding the execution lease.
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Task is not runnable before this instant (retry backoff, open circuit).
    pub not_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub plan: Vec<PlanStep>,
    pub last_error: Option<String>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(payload: TaskPayload, priority: TaskPriority, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind: payload.kind().to_string(),
            payload,
            status: TaskStatus::New,
            priority,
            created_at: now,
            updated_at: now,
            approval_required: false,
            retry_count: 0,
            lease_owner: None,
            lease_expires_at: None,
            not_before: None,
            plan: Vec::new(),
            last_error: None,
            archived_at: None,
        }
    }

    /// Whether `worker` holds an unexpired lease at `now`.
    pub fn is_leased_by(&self, worker: &str, now: DateTime<Utc>) -> bool {
        self.lease_owner.as_deref() == Some(worker)
            && self.lease_expires_at.is_some_and(|expires| expires > now)
    }

    /// Summary of the irreversible steps, shown to the approver.
    pub fn irreversible_summary(&self) -> String {
        let actions: Vec<&str> = self
            .plan
            .iter()
            .filter(|step| step.irreversible)
            .map(|step| step.name.as_str())
            .collect();
        if actions.is_empty() {
            format!("{} task {}", self.kind, self.id)
        } else {
            format!("{} task: {}", self.kind, actions.join(", "))
        }
    }
}
