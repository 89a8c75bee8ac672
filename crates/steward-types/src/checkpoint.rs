//! Checkpoint: durable record of progress after one plan step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointOutcome {
    Success,
    Failure,
}

/// Immutable snapshot of a task's progress at `step_index`.
///
/// A success checkpoint carries the step output, which becomes the prior
/// state handed to the next step. A failure checkpoint carries the error
/// that ended the task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub task_id: Uuid,
    pub step_index: u32,
    pub step_name: String,
    pub state: Value,
    pub outcome: CheckpointOutcome,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn is_success(&self) -> bool {
        self.outcome == CheckpointOutcome::Success
    }
}
