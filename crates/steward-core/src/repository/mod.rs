//! Repository traits ("ports") implemented by the infrastructure layer.

pub mod alert;
pub mod approval;
pub mod breaker;
pub mod checkpoint;
pub mod error_log;
pub mod task;

pub use alert::AlertRepository;
pub use approval::ApprovalRepository;
pub use breaker::BreakerRepository;
pub use checkpoint::CheckpointRepository;
pub use error_log::ErrorLogRepository;
pub use task::{OutcomeCounts, TaskRepository};

/// Every repository the orchestrator needs, behind one cloneable handle.
///
/// Blanket-implemented for any type that implements all the repository
/// traits, so a single SQLite store (or in-memory test store) satisfies it.
pub trait Store:
    TaskRepository
    + CheckpointRepository
    + ApprovalRepository
    + ErrorLogRepository
    + BreakerRepository
    + AlertRepository
    + Clone
    + Send
    + Sync
    + 'static
{
}

impl<T> Store for T where
    T: TaskRepository
        + CheckpointRepository
        + ApprovalRepository
        + ErrorLogRepository
        + BreakerRepository
        + AlertRepository
        + Clone
        + Send
        + Sync
        + 'static
{
}
