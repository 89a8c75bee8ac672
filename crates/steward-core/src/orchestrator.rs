//! Orchestrator facade.
//!
//! Wires the controller, engine, breakers, dispatcher, and health monitor
//! around one store and exposes the producer and operator interfaces:
//! `submit`, `list_pending_approvals`, `decide`, `list_escalations`,
//! `health`, and `inspect`. `run` drives the daemon services until the
//! cancellation token fires.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use steward_types::alert::Alert;
use steward_types::approval::{ApprovalDecision, ApprovalRequest};
use steward_types::checkpoint::Checkpoint;
use steward_types::config::StewardConfig;
use steward_types::error::{CircuitOpenError, PlanningError, RepositoryError, ValidationError};
use steward_types::failure::ErrorRecord;
use steward_types::health::HealthReport;
use steward_types::task::{Task, TaskPayload, TaskPriority, TaskStatus};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock::Clock;
use crate::event::bus::EventBus;
use crate::execution::checkpoint::CheckpointError;
use crate::execution::connector::ConnectorRegistry;
use crate::execution::engine::{EngineError, ExecutionEngine};
use crate::execution::worker::WorkerPool;
use crate::lifecycle::controller::{TaskController, TransitionError};
use crate::lifecycle::planner::Planner;
use crate::monitor::escalation::EscalationDispatcher;
use crate::monitor::health::HealthMonitor;
use crate::recovery::breaker::CircuitBreakerRegistry;
use crate::repository::Store;

/// Upper bound for operator listings.
const LIST_LIMIT: u32 = 1_000;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Operator-facing error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("invalid transition for task {task_id}: currently {current}, requested {requested}")]
    InvalidTransition {
        task_id: Uuid,
        current: TaskStatus,
        requested: TaskStatus,
    },

    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    #[error("planning failed: {0}")]
    Planning(#[from] PlanningError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("approval request {0} is already resolved")]
    AlreadyResolved(Uuid),

    #[error("approval request {0} has expired")]
    Expired(Uuid),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<TransitionError> for OrchestratorError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::Validation(e) => Self::Validation(e),
            TransitionError::Planning(e) => Self::Planning(e),
            TransitionError::InvalidTransition {
                task_id,
                current,
                requested,
            } => Self::InvalidTransition {
                task_id,
                current,
                requested,
            },
            TransitionError::TaskNotFound(id) => Self::NotFound(format!("task {id}")),
            TransitionError::ApprovalNotFound(id) => Self::NotFound(format!("approval request {id}")),
            TransitionError::ApprovalResolved(id) => Self::AlreadyResolved(id),
            TransitionError::ApprovalExpired(id) => Self::Expired(id),
            TransitionError::Repository(e) => e.into(),
        }
    }
}

impl From<RepositoryError> for OrchestratorError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => Self::NotFound("record".to_string()),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<CheckpointError> for OrchestratorError {
    fn from(err: CheckpointError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<EngineError> for OrchestratorError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Transition(e) => e.into(),
            EngineError::Checkpoint(e) => e.into(),
            EngineError::Repository(e) => e.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Read models
// ---------------------------------------------------------------------------

/// Everything recorded about one task, for audit.
#[derive(Debug, Clone, Serialize)]
pub struct TaskAudit {
    pub task: Task,
    pub checkpoints: Vec<Checkpoint>,
    pub errors: Vec<ErrorRecord>,
    pub approvals: Vec<ApprovalRequest>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceSummary {
    /// Transitions applied to finish interrupted approval steps.
    pub repaired: usize,
    pub expired: usize,
    pub archived: u64,
    /// Checkpoints deleted.
    pub pruned: u64,
    pub errors_pruned: u64,
    pub alerts_pruned: u64,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator<S: Store, P: Planner> {
    store: S,
    planner: P,
    config: StewardConfig,
    clock: Arc<dyn Clock>,
    bus: EventBus,
    controller: Arc<TaskController<S>>,
    breakers: Arc<CircuitBreakerRegistry<S>>,
    dispatcher: Arc<EscalationDispatcher<S>>,
    engine: Arc<ExecutionEngine<S>>,
    monitor: Arc<HealthMonitor<S>>,
}

impl<S: Store, P: Planner + 'static> Orchestrator<S, P> {
    pub fn new(
        store: S,
        planner: P,
        connectors: ConnectorRegistry,
        config: StewardConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let bus = EventBus::default();
        let controller = Arc::new(TaskController::new(
            store.clone(),
            &config,
            clock.clone(),
            bus.clone(),
        ));
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            store.clone(),
            config.breaker.clone(),
            clock.clone(),
            bus.clone(),
        ));
        let dispatcher = Arc::new(EscalationDispatcher::new(
            store.clone(),
            &config.alerts,
            clock.clone(),
            bus.clone(),
        ));
        let engine = Arc::new(ExecutionEngine::new(
            store.clone(),
            controller.clone(),
            breakers.clone(),
            dispatcher.clone(),
            connectors,
            &config,
            clock.clone(),
            bus.clone(),
        ));
        let monitor = Arc::new(HealthMonitor::new(
            store.clone(),
            breakers.clone(),
            dispatcher.clone(),
            config.health.clone(),
            clock.clone(),
            bus.clone(),
        ));
        Self {
            store,
            planner,
            config,
            clock,
            bus,
            controller,
            breakers,
            dispatcher,
            engine,
            monitor,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine<S>> {
        &self.engine
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry<S>> {
        &self.breakers
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor<S>> {
        &self.monitor
    }

    // -----------------------------------------------------------------------
    // Producer interface
    // -----------------------------------------------------------------------

    /// Accept a task from a producer and admit it.
    ///
    /// Malformed payloads are rejected before anything is stored. Once
    /// stored, a planning failure leaves the task FAILED and its id is still
    /// returned so the failure can be inspected.
    pub async fn submit(
        &self,
        kind: &str,
        payload: Value,
        priority: TaskPriority,
    ) -> Result<Uuid, OrchestratorError> {
        let payload = TaskPayload::from_parts(kind, payload)?;
        payload.validate()?;

        let task = self.controller.submit(payload, priority).await?;
        match self.controller.admit(task.id, &self.planner).await {
            Ok(_) => {}
            Err(TransitionError::Planning(e)) => {
                tracing::warn!(task_id = %task.id, error = %e, "planning failed, task marked failed");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(task.id)
    }

    /// Admit tasks left in NEW, e.g. after a crash between submit and admit.
    pub async fn admit_new(&self) -> Result<usize, OrchestratorError> {
        let fresh = self.store.list_tasks(Some(TaskStatus::New), LIST_LIMIT).await?;
        let mut admitted = 0;
        for task in fresh {
            match self.controller.admit(task.id, &self.planner).await {
                Ok(_) => admitted += 1,
                Err(e) => tracing::warn!(task_id = %task.id, error = %e, "admission failed"),
            }
        }
        Ok(admitted)
    }

    // -----------------------------------------------------------------------
    // Operator interface
    // -----------------------------------------------------------------------

    pub async fn list_pending_approvals(&self) -> Result<Vec<ApprovalRequest>, OrchestratorError> {
        Ok(self.store.list_pending_approvals().await?)
    }

    pub async fn decide(
        &self,
        request_id: Uuid,
        decision: ApprovalDecision,
    ) -> Result<Task, OrchestratorError> {
        Ok(self.controller.resolve_approval(request_id, decision).await?)
    }

    pub async fn list_escalations(&self) -> Result<Vec<Task>, OrchestratorError> {
        let tasks = self
            .store
            .list_tasks(Some(TaskStatus::Escalated), LIST_LIMIT)
            .await?;
        Ok(tasks.into_iter().filter(|t| t.archived_at.is_none()).collect())
    }

    pub async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        limit: u32,
    ) -> Result<Vec<Task>, OrchestratorError> {
        Ok(self.store.list_tasks(status, limit).await?)
    }

    /// Current health, measured without recording history or reacting.
    pub async fn health(&self) -> HealthReport {
        self.monitor.report().await
    }

    pub async fn inspect(&self, task_id: Uuid) -> Result<TaskAudit, OrchestratorError> {
        let task = self.controller.task(task_id).await?;
        Ok(TaskAudit {
            task,
            checkpoints: self.store.list_checkpoints(&task_id).await?,
            errors: self.store.list_errors_for_task(&task_id).await?,
            approvals: self.store.list_approvals_for_task(&task_id).await?,
        })
    }

    pub async fn list_alerts(&self, include_resolved: bool) -> Result<Vec<Alert>, OrchestratorError> {
        Ok(self.dispatcher.list_alerts(include_resolved).await?)
    }

    pub async fn resolve_alert(&self, id: Uuid, note: Option<&str>) -> Result<bool, OrchestratorError> {
        match self.dispatcher.resolve(id, note).await {
            Err(RepositoryError::NotFound) => Err(OrchestratorError::NotFound(format!("alert {id}"))),
            other => Ok(other?),
        }
    }

    // -----------------------------------------------------------------------
    // Daemon
    // -----------------------------------------------------------------------

    /// Repair interrupted approval steps, expire overdue approvals, archive
    /// old terminal tasks, and prune history past the retention period.
    ///
    /// Checkpoints and error records of FAILED or ESCALATED tasks are kept,
    /// as are unresolved alerts.
    pub async fn run_maintenance(&self) -> Result<MaintenanceSummary, OrchestratorError> {
        let now = self.clock.now();
        let retention = self.config.retention.retention();
        let cutoff = now - retention;
        let repaired = self.controller.repair_approvals().await?;
        let expired = self.controller.sweep_expired(now).await?.len();
        let archived = self.controller.archive_terminal(retention).await?;
        let pruned = self.engine.checkpoints().prune(cutoff).await?;
        let errors_pruned = self.store.prune_errors(cutoff).await?;
        let alerts_pruned = self.store.prune_alerts(cutoff).await?;
        Ok(MaintenanceSummary {
            repaired,
            expired,
            archived,
            pruned,
            errors_pruned,
            alerts_pruned,
        })
    }

    /// Restore breaker state, reclaim expired leases, and admit leftover NEW
    /// tasks.
    pub async fn startup(&self) -> Result<(), OrchestratorError> {
        self.breakers.load().await?;
        let resumable = self.engine.recover().await?;
        let admitted = self.admit_new().await?;
        tracing::info!(resumable = resumable.len(), admitted, "orchestrator recovered");
        Ok(())
    }

    /// Run workers, the health monitor, and periodic maintenance until
    /// `cancel` fires, then wait for in-flight steps to finish.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let pool = WorkerPool::start(
            self.engine.clone(),
            &self.bus,
            self.config.workers.count,
            self.config.workers.poll_interval(),
            cancel.child_token(),
        );

        let mut services = JoinSet::new();
        let monitor = self.monitor.clone();
        let token = cancel.clone();
        services.spawn(async move { monitor.run(token).await });

        let this = self.clone();
        let token = cancel.clone();
        services.spawn(async move {
            let mut ticker = tokio::time::interval(this.config.approval.sweep_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => match this.run_maintenance().await {
                        Ok(summary) if summary != MaintenanceSummary::default() => {
                            tracing::info!(?summary, "maintenance pass");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!(error = %e, "maintenance pass failed"),
                    },
                }
            }
        });

        cancel.cancelled().await;
        pool.shutdown().await;
        while services.join_next().await.is_some() {}
        tracing::info!("orchestrator stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
