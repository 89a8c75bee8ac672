//! Event types for the orchestrator event bus.
//!
//! `OrchestratorEvent` is broadcast on every lifecycle transition, step
//! commit or failure, breaker transition, alert, and health change.
//! All variants are Clone + Send + Sync for use with tokio broadcast channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::breaker::CircuitState;
use crate::failure::{ErrorKind, Severity};
use crate::health::HealthStatus;
use crate::task::{TaskPriority, TaskStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    /// A producer submitted a new task.
    TaskSubmitted {
        task_id: Uuid,
        kind: String,
        priority: TaskPriority,
    },

    /// A guarded status transition committed.
    TaskTransitioned {
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// A step completed and its checkpoint is durable.
    StepCommitted {
        task_id: Uuid,
        step_index: u32,
        step_name: String,
    },

    /// A step attempt failed and was classified.
    StepFailed {
        task_id: Uuid,
        step_index: u32,
        kind: ErrorKind,
        attempt: u32,
        will_retry: bool,
    },

    /// The task was requeued until `until` because a dependency is open.
    TaskDeferred {
        task_id: Uuid,
        dependency: String,
        until: DateTime<Utc>,
    },

    BreakerTransitioned {
        dependency: String,
        from: CircuitState,
        to: CircuitState,
    },

    AlertDispatched {
        alert_id: Uuid,
        severity: Severity,
        title: String,
    },

    HealthChanged {
        from: HealthStatus,
        to: HealthStatus,
    },

    /// Automated recovery asks a component to restart its work loop.
    RestartRequested { component: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = OrchestratorEvent::BreakerTransitioned {
            dependency: "email".to_string(),
            from: CircuitState::Closed,
            to: CircuitState::Open,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "breaker_transitioned");
        assert_eq!(json["to"], "open");
    }
}
