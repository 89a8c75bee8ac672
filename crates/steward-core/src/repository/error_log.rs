//! Append-only error record log.

use chrono::{DateTime, Utc};
use steward_types::error::RepositoryError;
use steward_types::failure::ErrorRecord;
use uuid::Uuid;

pub trait ErrorLogRepository: Send + Sync {
    fn append_error(
        &self,
        record: &ErrorRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn list_errors_for_task(
        &self,
        task_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<ErrorRecord>, RepositoryError>> + Send;

    /// Most recent records first.
    fn list_recent_errors(
        &self,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<ErrorRecord>, RepositoryError>> + Send;

    fn count_errors_since(
        &self,
        since: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// Delete records of DONE, REJECTED, or EXPIRED tasks last updated before
    /// `before`, plus records tied to no task that occurred before it.
    fn prune_errors(
        &self,
        before: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
