//! Checkpoint repository trait definition.

use chrono::{DateTime, Utc};
use steward_types::checkpoint::Checkpoint;
use steward_types::error::RepositoryError;
use uuid::Uuid;

pub trait CheckpointRepository: Send + Sync {
    /// Append a checkpoint. Fails with `RepositoryError::Conflict` unless its
    /// step index is strictly greater than every committed index for the task.
    fn append_checkpoint(
        &self,
        checkpoint: &Checkpoint,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Highest committed success checkpoint for a task.
    fn latest_success(
        &self,
        task_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Checkpoint>, RepositoryError>> + Send;

    /// All checkpoints of a task in step order.
    fn list_checkpoints(
        &self,
        task_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Checkpoint>, RepositoryError>> + Send;

    /// Delete checkpoints of DONE, REJECTED, or EXPIRED tasks last updated
    /// before `before`. Failed and escalated tasks keep their history.
    fn prune_checkpoints(
        &self,
        before: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
