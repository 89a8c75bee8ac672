//! Approval request repository trait definition.

use chrono::{DateTime, Utc};
use serde_json::Value;
use steward_types::approval::{ApprovalRequest, ApprovalStatus};
use steward_types::error::RepositoryError;
use uuid::Uuid;

pub trait ApprovalRepository: Send + Sync {
    /// Insert a pending request. Fails with `RepositoryError::Conflict` if
    /// the task already has a pending request.
    fn insert_approval(
        &self,
        request: &ApprovalRequest,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_approval(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ApprovalRequest>, RepositoryError>> + Send;

    /// Pending requests, oldest first.
    fn list_pending_approvals(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<ApprovalRequest>, RepositoryError>> + Send;

    fn list_approvals_for_task(
        &self,
        task_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<ApprovalRequest>, RepositoryError>> + Send;

    /// Compare-and-set PENDING -> `status`. Returns `false` if the request
    /// was already resolved.
    fn resolve_approval(
        &self,
        id: &Uuid,
        status: ApprovalStatus,
        edits: Option<&Value>,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Pending requests whose deadline is at or before `now`.
    fn list_expired_approvals(
        &self,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<ApprovalRequest>, RepositoryError>> + Send;
}
