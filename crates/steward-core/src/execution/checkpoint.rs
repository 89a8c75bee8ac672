//! Durable checkpoint manager for step-level progress.
//!
//! Wraps `CheckpointRepository` with the resume rules: checkpoints for a task
//! are strictly increasing by step index, and execution always resumes
//! strictly after the highest committed success checkpoint.

use chrono::{DateTime, Utc};
use serde_json::Value;
use steward_types::checkpoint::{Checkpoint, CheckpointOutcome};
use steward_types::error::RepositoryError;
use uuid::Uuid;

use crate::repository::CheckpointRepository;

// ---------------------------------------------------------------------------
// ResumePoint
// ---------------------------------------------------------------------------

/// Where execution of a task continues.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumePoint {
    /// Index of the next step to run.
    pub next_step: u32,
    /// Output of the last committed step, `Null` before the first.
    pub prior_state: Value,
}

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Generic over `R: CheckpointRepository` so it works with any storage
/// backend (SQLite, in-memory test store).
pub struct CheckpointManager<R: CheckpointRepository> {
    repo: R,
}

impl<R: CheckpointRepository> CheckpointManager<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Commit a successful step. Must be durable before the next step runs.
    pub async fn commit_success(
        &self,
        task_id: Uuid,
        step_index: u32,
        step_name: &str,
        output: Value,
        at: DateTime<Utc>,
    ) -> Result<Checkpoint, CheckpointError> {
        self.append(task_id, step_index, step_name, output, CheckpointOutcome::Success, at)
            .await
    }

    /// Record the step that ended the task, with the failure as its state.
    pub async fn commit_failure(
        &self,
        task_id: Uuid,
        step_index: u32,
        step_name: &str,
        error: Value,
        at: DateTime<Utc>,
    ) -> Result<Checkpoint, CheckpointError> {
        self.append(task_id, step_index, step_name, error, CheckpointOutcome::Failure, at)
            .await
    }

    async fn append(
        &self,
        task_id: Uuid,
        step_index: u32,
        step_name: &str,
        state: Value,
        outcome: CheckpointOutcome,
        at: DateTime<Utc>,
    ) -> Result<Checkpoint, CheckpointError> {
        let checkpoint = Checkpoint {
            task_id,
            step_index,
            step_name: step_name.to_string(),
            state,
            outcome,
            created_at: at,
        };

        self.repo
            .append_checkpoint(&checkpoint)
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(_) => CheckpointError::OutOfOrder { task_id, step_index },
                other => CheckpointError::Repository(other.to_string()),
            })?;

        tracing::debug!(
            task_id = %task_id,
            step_index,
            step_name,
            outcome = ?outcome,
            "checkpoint committed"
        );
        Ok(checkpoint)
    }

    /// Resume strictly after the highest committed success checkpoint.
    pub async fn resume_point(&self, task_id: Uuid) -> Result<ResumePoint, CheckpointError> {
        let latest = self
            .repo
            .latest_success(&task_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        Ok(match latest {
            Some(checkpoint) => ResumePoint {
                next_step: checkpoint.step_index + 1,
                prior_state: checkpoint.state,
            },
            None => ResumePoint {
                next_step: 0,
                prior_state: Value::Null,
            },
        })
    }

    pub async fn history(&self, task_id: Uuid) -> Result<Vec<Checkpoint>, CheckpointError> {
        self.repo
            .list_checkpoints(&task_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    /// Drop checkpoints of finished tasks past the retention period.
    pub async fn prune(&self, before: DateTime<Utc>) -> Result<u64, CheckpointError> {
        let pruned = self
            .repo
            .prune_checkpoints(before)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;
        if pruned > 0 {
            tracing::info!(pruned, "pruned checkpoints past retention");
        }
        Ok(pruned)
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint repository error: {0}")]
    Repository(String),

    /// A checkpoint at or beyond this index already exists.
    #[error("checkpoint for task {task_id} step {step_index} is not after the last committed step")]
    OutOfOrder { task_id: Uuid, step_index: u32 },
}
