//! Task state machine controller.
//!
//! The only component that changes a task's status. Every transition is a
//! compare-and-set on the stored status: when the task is not in the expected
//! source state the store is left untouched and `InvalidTransition` is
//! returned, so duplicate triggers from redundant producers are harmless.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use steward_types::approval::{ApprovalDecision, ApprovalRequest, ApprovalStatus};
use steward_types::config::StewardConfig;
use steward_types::error::{PlanningError, RepositoryError, ValidationError};
use steward_types::event::OrchestratorEvent;
use steward_types::task::{Task, TaskPayload, TaskPriority, TaskStatus, validate_plan};
use uuid::Uuid;

use crate::clock::Clock;
use crate::event::bus::EventBus;
use crate::lifecycle::planner::Planner;
use crate::repository::Store;

/// Tasks scanned per status by `repair_approvals`.
const REPAIR_BATCH: u32 = 1_000;

/// A half-applied approval step younger than this may still be finishing in
/// another process and is left alone.
const REPAIR_GRACE_SECS: i64 = 60;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("planning failed: {0}")]
    Planning(#[from] PlanningError),

    /// The task was not in the source state the operation requires.
    #[error("invalid transition for task {task_id}: currently {current}, requested {requested}")]
    InvalidTransition {
        task_id: Uuid,
        current: TaskStatus,
        requested: TaskStatus,
    },

    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("approval request not found: {0}")]
    ApprovalNotFound(Uuid),

    #[error("approval request {0} is already resolved")]
    ApprovalResolved(Uuid),

    #[error("approval request {0} has expired")]
    ApprovalExpired(Uuid),

    #[error("storage error: {0}")]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// TaskController
// ---------------------------------------------------------------------------

pub struct TaskController<S: Store> {
    store: S,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    approval_window: chrono::Duration,
    lease_ttl: chrono::Duration,
}

impl<S: Store> TaskController<S> {
    pub fn new(store: S, config: &StewardConfig, clock: Arc<dyn Clock>, bus: EventBus) -> Self {
        Self {
            store,
            bus,
            clock,
            approval_window: config.approval.window(),
            lease_ttl: config.workers.lease_ttl(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn lease_ttl(&self) -> chrono::Duration {
        self.lease_ttl
    }

    pub async fn task(&self, id: Uuid) -> Result<Task, TransitionError> {
        self.store
            .get_task(&id)
            .await?
            .ok_or(TransitionError::TaskNotFound(id))
    }

    // -----------------------------------------------------------------------
    // Intake
    // -----------------------------------------------------------------------

    /// Store a new task in NEW.
    pub async fn submit(
        &self,
        payload: TaskPayload,
        priority: TaskPriority,
    ) -> Result<Task, TransitionError> {
        let task = Task::new(payload, priority, self.clock.now());
        self.store.insert_task(&task).await?;

        tracing::info!(
            task_id = %task.id,
            kind = %task.kind,
            priority = %task.priority,
            "task submitted"
        );
        self.bus.publish(OrchestratorEvent::TaskSubmitted {
            task_id: task.id,
            kind: task.kind.clone(),
            priority: task.priority,
        });
        Ok(task)
    }

    /// Validate a NEW task, plan it, and move it to PLANNED.
    ///
    /// A plan with an irreversible step then opens an approval request
    /// (PENDING_APPROVAL); any other plan is approved unattended (APPROVED).
    /// Malformed payloads, planning failures, and invalid plans move the task
    /// to FAILED and are returned to the caller.
    pub async fn admit<P: Planner>(&self, id: Uuid, planner: &P) -> Result<Task, TransitionError> {
        let task = self.task(id).await?;
        if task.status != TaskStatus::New {
            return Err(TransitionError::InvalidTransition {
                task_id: id,
                current: task.status,
                requested: TaskStatus::Planned,
            });
        }

        if let Err(err) = task.payload.validate() {
            self.reject_admission(id, &err.to_string()).await?;
            return Err(err.into());
        }

        let plan = match planner.plan(&task).await {
            Ok(plan) => plan,
            Err(err) => {
                self.reject_admission(id, &err.to_string()).await?;
                return Err(err.into());
            }
        };
        if let Err(err) = validate_plan(&plan) {
            self.reject_admission(id, &err.to_string()).await?;
            return Err(err.into());
        }

        let approval_required = plan.iter().any(|step| step.irreversible);
        let applied = self
            .store
            .attach_plan(&id, &plan, approval_required, self.clock.now())
            .await?;
        self.ensure_applied(applied, id, TaskStatus::Planned).await?;
        self.announce(id, TaskStatus::New, TaskStatus::Planned, None);
        tracing::debug!(task_id = %id, steps = plan.len(), approval_required, "plan attached");

        let planned = self.task(id).await?;
        if approval_required {
            self.request_approval(id, &planned.irreversible_summary())
                .await?;
        } else {
            self.transition(id, TaskStatus::Planned, TaskStatus::Approved, None)
                .await?;
        }
        self.task(id).await
    }

    async fn reject_admission(&self, id: Uuid, reason: &str) -> Result<(), TransitionError> {
        tracing::warn!(task_id = %id, reason, "task rejected at admission");
        self.transition(id, TaskStatus::New, TaskStatus::Failed, Some(reason))
            .await
    }

    // -----------------------------------------------------------------------
    // Approval gate
    // -----------------------------------------------------------------------

    /// Open an approval request for a PLANNED task and move it to
    /// PENDING_APPROVAL.
    pub async fn request_approval(
        &self,
        id: Uuid,
        action_summary: &str,
    ) -> Result<ApprovalRequest, TransitionError> {
        let task = self.task(id).await?;
        if task.status != TaskStatus::Planned {
            return Err(TransitionError::InvalidTransition {
                task_id: id,
                current: task.status,
                requested: TaskStatus::PendingApproval,
            });
        }

        let now = self.clock.now();
        let request = ApprovalRequest::new(id, action_summary, now, self.approval_window);
        match self.store.insert_approval(&request).await {
            Ok(()) => {}
            Err(RepositoryError::Conflict(_)) => {
                return Err(TransitionError::InvalidTransition {
                    task_id: id,
                    current: task.status,
                    requested: TaskStatus::PendingApproval,
                });
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(err) = self
            .transition(id, TaskStatus::Planned, TaskStatus::PendingApproval, None)
            .await
        {
            // Another trigger moved the task first; close the orphaned request.
            self.store
                .resolve_approval(&request.id, ApprovalStatus::Expired, None, now)
                .await?;
            return Err(err);
        }

        tracing::info!(
            task_id = %id,
            request_id = %request.id,
            expires_at = %request.expires_at,
            "approval requested"
        );
        Ok(request)
    }

    /// Apply a human decision to a pending, unexpired request.
    ///
    /// Approval edits replace the task payload after re-validation; invalid
    /// edits are rejected and leave the request pending.
    pub async fn resolve_approval(
        &self,
        request_id: Uuid,
        decision: ApprovalDecision,
    ) -> Result<Task, TransitionError> {
        let now = self.clock.now();
        let request = self
            .store
            .get_approval(&request_id)
            .await?
            .ok_or(TransitionError::ApprovalNotFound(request_id))?;
        if request.status != ApprovalStatus::Pending {
            return Err(TransitionError::ApprovalResolved(request_id));
        }
        if request.is_expired(now) {
            self.expire(&request, now).await?;
            return Err(TransitionError::ApprovalExpired(request_id));
        }

        let task = self.task(request.task_id).await?;
        match decision {
            ApprovalDecision::Approve { edits } => {
                let edited = match &edits {
                    Some(doc) => {
                        let payload = TaskPayload::from_parts(&task.kind, doc.clone())?;
                        payload.validate()?;
                        Some(payload)
                    }
                    None => None,
                };

                let resolved = self
                    .store
                    .resolve_approval(&request_id, ApprovalStatus::Approved, edits.as_ref(), now)
                    .await?;
                if !resolved {
                    return Err(TransitionError::ApprovalResolved(request_id));
                }
                if let Some(payload) = edited {
                    let replaced = self.store.replace_payload(&task.id, &payload, now).await?;
                    self.ensure_applied(replaced, task.id, TaskStatus::Approved)
                        .await?;
                    tracing::info!(task_id = %task.id, "payload replaced by approver edits");
                }
                self.transition(
                    task.id,
                    TaskStatus::PendingApproval,
                    TaskStatus::Approved,
                    None,
                )
                .await?;
            }
            ApprovalDecision::Reject { reason } => {
                let resolved = self
                    .store
                    .resolve_approval(&request_id, ApprovalStatus::Rejected, None, now)
                    .await?;
                if !resolved {
                    return Err(TransitionError::ApprovalResolved(request_id));
                }
                let reason = reason.unwrap_or_else(|| "rejected by approver".to_string());
                self.transition(
                    task.id,
                    TaskStatus::PendingApproval,
                    TaskStatus::Rejected,
                    Some(&reason),
                )
                .await?;
            }
        }

        self.task(task.id).await
    }

    /// Expire every pending request whose deadline is at or before `now`.
    /// Returns the ids of the tasks that moved to EXPIRED.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, TransitionError> {
        let expired = self.store.list_expired_approvals(now).await?;
        let mut tasks = Vec::with_capacity(expired.len());
        for request in &expired {
            if self.expire(request, now).await? {
                tasks.push(request.task_id);
            }
        }
        if !tasks.is_empty() {
            tracing::info!(count = tasks.len(), "expired unresolved approvals");
        }
        Ok(tasks)
    }

    async fn expire(&self, request: &ApprovalRequest, now: DateTime<Utc>) -> Result<bool, TransitionError> {
        let resolved = self
            .store
            .resolve_approval(&request.id, ApprovalStatus::Expired, None, now)
            .await?;
        if !resolved {
            return Ok(false);
        }
        match self
            .transition(
                request.task_id,
                TaskStatus::PendingApproval,
                TaskStatus::Expired,
                Some("approval window elapsed"),
            )
            .await
        {
            Ok(()) => Ok(true),
            Err(TransitionError::InvalidTransition { current, .. }) => {
                tracing::warn!(
                    task_id = %request.task_id,
                    request_id = %request.id,
                    current = %current,
                    "expired request belonged to a task no longer awaiting approval"
                );
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Finish approval steps that stopped between writing the request and
    /// moving the task.
    ///
    /// A PLANNED task is approved unattended, sent for approval, or moved to
    /// PENDING_APPROVAL next to the request it already has. A PENDING_APPROVAL
    /// task with no pending request takes the outcome of its latest decided
    /// request. Returns the number of transitions applied.
    pub async fn repair_approvals(&self) -> Result<usize, TransitionError> {
        let now = self.clock.now();
        let settled_before = now - chrono::Duration::seconds(REPAIR_GRACE_SECS);
        let mut repaired = 0;

        let planned = self
            .store
            .list_tasks(Some(TaskStatus::Planned), REPAIR_BATCH)
            .await?;
        for task in planned.iter().filter(|t| t.updated_at < settled_before) {
            match self.repair_planned(task).await {
                Ok(()) => repaired += 1,
                Err(e) => tracing::warn!(task_id = %task.id, error = %e, "planned task repair failed"),
            }
        }

        let pending = self
            .store
            .list_tasks(Some(TaskStatus::PendingApproval), REPAIR_BATCH)
            .await?;
        for task in &pending {
            match self.repair_pending(task, now, settled_before).await {
                Ok(true) => repaired += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(task_id = %task.id, error = %e, "pending task repair failed"),
            }
        }

        if repaired > 0 {
            tracing::info!(repaired, "repaired interrupted approval steps");
        }
        Ok(repaired)
    }

    async fn repair_planned(&self, task: &Task) -> Result<(), TransitionError> {
        if !task.approval_required {
            return self
                .transition(task.id, TaskStatus::Planned, TaskStatus::Approved, None)
                .await;
        }
        if self.store.list_approvals_for_task(&task.id).await?.is_empty() {
            self.request_approval(task.id, &task.irreversible_summary())
                .await?;
            return Ok(());
        }
        // The request exists; settle it once the task is back in the gate.
        self.transition(task.id, TaskStatus::Planned, TaskStatus::PendingApproval, None)
            .await
    }

    async fn repair_pending(
        &self,
        task: &Task,
        now: DateTime<Utc>,
        settled_before: DateTime<Utc>,
    ) -> Result<bool, TransitionError> {
        let requests = self.store.list_approvals_for_task(&task.id).await?;
        if requests.iter().any(|r| r.status == ApprovalStatus::Pending) {
            return Ok(false);
        }

        let Some(latest) = requests.last() else {
            let request = ApprovalRequest::new(
                task.id,
                task.irreversible_summary(),
                now,
                self.approval_window,
            );
            self.store.insert_approval(&request).await?;
            tracing::warn!(task_id = %task.id, request_id = %request.id, "reopened missing approval request");
            return Ok(false);
        };
        if latest.decided_at.is_some_and(|at| at >= settled_before) {
            return Ok(false);
        }

        match latest.status {
            ApprovalStatus::Approved => {
                if let Some(doc) = &latest.edits {
                    let payload = TaskPayload::from_parts(&task.kind, doc.clone())?;
                    self.store.replace_payload(&task.id, &payload, now).await?;
                }
                self.transition(task.id, TaskStatus::PendingApproval, TaskStatus::Approved, None)
                    .await?;
            }
            ApprovalStatus::Rejected => {
                self.transition(
                    task.id,
                    TaskStatus::PendingApproval,
                    TaskStatus::Rejected,
                    Some("rejected by approver"),
                )
                .await?;
            }
            ApprovalStatus::Expired => {
                self.transition(
                    task.id,
                    TaskStatus::PendingApproval,
                    TaskStatus::Expired,
                    Some("approval window elapsed"),
                )
                .await?;
            }
            ApprovalStatus::Pending => return Ok(false),
        }
        tracing::info!(task_id = %task.id, request_id = %latest.id, outcome = %latest.status, "applied recorded approval outcome");
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// APPROVED -> IN_PROGRESS, granting `worker` the execution lease.
    pub async fn begin_execution(&self, id: Uuid, worker: &str) -> Result<Task, TransitionError> {
        let now = self.clock.now();
        let applied = self
            .store
            .begin_execution(&id, worker, now + self.lease_ttl, now)
            .await?;
        self.ensure_applied(applied, id, TaskStatus::InProgress).await?;
        self.announce(id, TaskStatus::Approved, TaskStatus::InProgress, None);
        self.task(id).await
    }

    /// IN_PROGRESS -> DONE, releasing the lease.
    pub async fn complete(&self, id: Uuid) -> Result<(), TransitionError> {
        self.transition(id, TaskStatus::InProgress, TaskStatus::Done, None)
            .await
    }

    /// IN_PROGRESS -> FAILED, releasing the lease.
    pub async fn fail(&self, id: Uuid, reason: &str) -> Result<(), TransitionError> {
        self.transition(id, TaskStatus::InProgress, TaskStatus::Failed, Some(reason))
            .await
    }

    /// IN_PROGRESS or FAILED -> ESCALATED, releasing the lease.
    pub async fn escalate(&self, id: Uuid, reason: &str) -> Result<(), TransitionError> {
        let task = self.task(id).await?;
        let from = if task.status == TaskStatus::Failed {
            TaskStatus::Failed
        } else {
            TaskStatus::InProgress
        };
        self.transition(id, from, TaskStatus::Escalated, Some(reason))
            .await
    }

    /// Archive terminal tasks untouched for longer than `older_than`.
    pub async fn archive_terminal(&self, older_than: chrono::Duration) -> Result<u64, TransitionError> {
        let now = self.clock.now();
        let archived = self.store.archive_terminal(now - older_than, now).await?;
        if archived > 0 {
            tracing::info!(archived, "archived terminal tasks");
        }
        Ok(archived)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn transition(
        &self,
        id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
        reason: Option<&str>,
    ) -> Result<(), TransitionError> {
        if !from.can_transition_to(to) {
            let current = self.task(id).await?.status;
            return Err(TransitionError::InvalidTransition {
                task_id: id,
                current,
                requested: to,
            });
        }
        let applied = self
            .store
            .transition(&id, from, to, reason, self.clock.now())
            .await?;
        self.ensure_applied(applied, id, to).await?;
        self.announce(id, from, to, reason);
        Ok(())
    }

    /// Turn a failed compare-and-set into `InvalidTransition`, reporting the
    /// status the task actually has.
    async fn ensure_applied(
        &self,
        applied: bool,
        id: Uuid,
        requested: TaskStatus,
    ) -> Result<(), TransitionError> {
        if applied {
            return Ok(());
        }
        let current = self.task(id).await?.status;
        tracing::debug!(task_id = %id, current = %current, requested = %requested, "transition rejected");
        Err(TransitionError::InvalidTransition {
            task_id: id,
            current,
            requested,
        })
    }

    fn announce(&self, id: Uuid, from: TaskStatus, to: TaskStatus, reason: Option<&str>) {
        tracing::info!(task_id = %id, from = %from, to = %to, reason, "task transition");
        self.bus
            .publish(OrchestratorEvent::TaskTransitioned { task_id: id, from, to });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
