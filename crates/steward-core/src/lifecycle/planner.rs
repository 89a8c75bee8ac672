//! Planning port: the reasoning collaborator that turns a task into steps.

use steward_types::error::PlanningError;
use steward_types::task::{PlanStep, Task};

/// Produces the ordered step list for a task.
///
/// A `PlanningError` is a fatal task error: the task moves NEW -> FAILED.
pub trait Planner: Send + Sync {
    fn plan(
        &self,
        task: &Task,
    ) -> impl std::future::Future<Output = Result<Vec<PlanStep>, PlanningError>> + Send;
}
