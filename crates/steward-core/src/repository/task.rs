//! Task repository trait definition.
//!
//! Every status change is a guarded compare-and-set: the update applies only
//! if the stored status equals the expected source status, and reports
//! whether it applied. Lease operations follow the same rule, so no two
//! workers can hold the same task's lease at once.

use chrono::{DateTime, Utc};
use steward_types::error::RepositoryError;
use steward_types::task::{PlanStep, Task, TaskPayload, TaskStatus};
use uuid::Uuid;

/// Finished-task counts within a time window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub succeeded: u64,
    /// FAILED plus ESCALATED.
    pub failed: u64,
}

impl OutcomeCounts {
    pub fn failure_rate(&self) -> f64 {
        let total = self.succeeded + self.failed;
        if total == 0 {
            0.0
        } else {
            self.failed as f64 / total as f64
        }
    }
}

/// Repository trait for task persistence.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait TaskRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Records
    // -----------------------------------------------------------------------

    fn insert_task(
        &self,
        task: &Task,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_task(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Task>, RepositoryError>> + Send;

    /// List tasks newest first, optionally filtered by status.
    fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Task>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Guarded transitions
    // -----------------------------------------------------------------------

    /// Compare-and-set `from -> to`. Entering a terminal state clears the
    /// lease and `not_before`. `reason`, when given, becomes `last_error`.
    /// Returns `false` if the stored status was not `from`.
    fn transition(
        &self,
        id: &Uuid,
        from: TaskStatus,
        to: TaskStatus,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// NEW -> PLANNED with the plan and approval flag stored in one update.
    fn attach_plan(
        &self,
        id: &Uuid,
        plan: &[PlanStep],
        approval_required: bool,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Replace the payload of a task that is still PENDING_APPROVAL.
    fn replace_payload(
        &self,
        id: &Uuid,
        payload: &TaskPayload,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Leases
    // -----------------------------------------------------------------------

    /// APPROVED -> IN_PROGRESS, taking the lease in the same update.
    fn begin_execution(
        &self,
        id: &Uuid,
        worker: &str,
        lease_expires_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Take the lease of an IN_PROGRESS task whose `not_before` has passed
    /// and whose lease is free, expired, or already held by `worker`
    /// (renewal).
    fn acquire_lease(
        &self,
        id: &Uuid,
        worker: &str,
        now: DateTime<Utc>,
        lease_expires_at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Release a lease held by `worker`, optionally deferring the task.
    fn release_lease(
        &self,
        id: &Uuid,
        worker: &str,
        not_before: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Clear every lease that expired before `now`. Returns how many.
    fn release_expired_leases(
        &self,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// Store the consecutive-failure count of the current step.
    fn set_retry_state(
        &self,
        id: &Uuid,
        retry_count: u32,
        last_error: Option<&str>,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Scheduling and aggregates
    // -----------------------------------------------------------------------

    /// APPROVED or unleased IN_PROGRESS tasks eligible at `now`, most urgent
    /// priority first, then oldest first.
    fn list_runnable(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Task>, RepositoryError>> + Send;

    fn count_by_status(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<(TaskStatus, u64)>, RepositoryError>> + Send;

    /// Tasks that reached DONE, FAILED, or ESCALATED at or after `since`.
    fn outcome_counts_since(
        &self,
        since: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<OutcomeCounts, RepositoryError>> + Send;

    /// Mark terminal tasks last updated before `before` as archived.
    fn archive_terminal(
        &self,
        before: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
