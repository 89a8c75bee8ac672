//! In-memory store, planner, and connector doubles for core tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use steward_types::alert::Alert;
use steward_types::approval::{ApprovalRequest, ApprovalStatus};
use steward_types::breaker::CircuitBreakerState;
use steward_types::checkpoint::{Checkpoint, CheckpointOutcome};
use steward_types::error::{PlanningError, RepositoryError};
use steward_types::failure::ErrorRecord;
use steward_types::task::{PlanStep, Task, TaskPayload, TaskStatus};
use uuid::Uuid;

use crate::execution::connector::{Connector, ConnectorError, StepCall};
use crate::lifecycle::planner::Planner;
use crate::repository::{
    AlertRepository, ApprovalRepository, BreakerRepository, CheckpointRepository,
    ErrorLogRepository, OutcomeCounts, TaskRepository,
};

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Inner {
    tasks: HashMap<Uuid, Task>,
    checkpoints: HashMap<Uuid, Vec<Checkpoint>>,
    approvals: Vec<ApprovalRequest>,
    errors: Vec<ErrorRecord>,
    breakers: HashMap<String, CircuitBreakerState>,
    alerts: Vec<Alert>,
}

/// Implements every repository trait over shared maps with the same
/// compare-and-set rules as the SQLite store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    fn with<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut inner = self.inner.lock().unwrap();
        f(&mut inner)
    }

    pub fn breakers(&self) -> Vec<CircuitBreakerState> {
        self.with(|inner| inner.breakers.values().cloned().collect())
    }

    pub fn pending_request_for(&self, task_id: Uuid) -> Option<ApprovalRequest> {
        self.with(|inner| {
            inner
                .approvals
                .iter()
                .find(|r| r.task_id == task_id && r.status == ApprovalStatus::Pending)
                .cloned()
        })
    }

    /// Hand the task's lease to another owner, as a competing worker would
    /// after the original lease expired.
    pub fn steal_lease(&self, task_id: Uuid, owner: &str) {
        self.with(|inner| {
            if let Some(task) = inner.tasks.get_mut(&task_id) {
                task.lease_owner = Some(owner.to_string());
            }
        })
    }

    fn update_task(&self, id: &Uuid, f: impl FnOnce(&mut Task) -> bool) -> bool {
        self.with(|inner| inner.tasks.get_mut(id).is_some_and(f))
    }
}

impl TaskRepository for MemoryStore {
    async fn insert_task(&self, task: &Task) -> Result<(), RepositoryError> {
        self.with(|inner| {
            if inner.tasks.contains_key(&task.id) {
                return Err(RepositoryError::Conflict(format!("task {} exists", task.id)));
            }
            inner.tasks.insert(task.id, task.clone());
            Ok(())
        })
    }

    async fn get_task(&self, id: &Uuid) -> Result<Option<Task>, RepositoryError> {
        Ok(self.with(|inner| inner.tasks.get(id).cloned()))
    }

    async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        limit: u32,
    ) -> Result<Vec<Task>, RepositoryError> {
        Ok(self.with(|inner| {
            let mut tasks: Vec<Task> = inner
                .tasks
                .values()
                .filter(|t| status.is_none_or(|s| t.status == s))
                .cloned()
                .collect();
            tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            tasks.truncate(limit as usize);
            tasks
        }))
    }

    async fn transition(
        &self,
        id: &Uuid,
        from: TaskStatus,
        to: TaskStatus,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        Ok(self.update_task(id, |task| {
            if task.status != from {
                return false;
            }
            task.status = to;
            task.updated_at = at;
            if let Some(reason) = reason {
                task.last_error = Some(reason.to_string());
            }
            if to.is_terminal() {
                task.lease_owner = None;
                task.lease_expires_at = None;
                task.not_before = None;
            }
            true
        }))
    }

    async fn attach_plan(
        &self,
        id: &Uuid,
        plan: &[PlanStep],
        approval_required: bool,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        Ok(self.update_task(id, |task| {
            if task.status != TaskStatus::New {
                return false;
            }
            task.status = TaskStatus::Planned;
            task.plan = plan.to_vec();
            task.approval_required = approval_required;
            task.updated_at = at;
            true
        }))
    }

    async fn replace_payload(
        &self,
        id: &Uuid,
        payload: &TaskPayload,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        Ok(self.update_task(id, |task| {
            if task.status != TaskStatus::PendingApproval {
                return false;
            }
            task.payload = payload.clone();
            task.updated_at = at;
            true
        }))
    }

    async fn begin_execution(
        &self,
        id: &Uuid,
        worker: &str,
        lease_expires_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        Ok(self.update_task(id, |task| {
            if task.status != TaskStatus::Approved {
                return false;
            }
            task.status = TaskStatus::InProgress;
            task.lease_owner = Some(worker.to_string());
            task.lease_expires_at = Some(lease_expires_at);
            task.updated_at = at;
            true
        }))
    }

    async fn acquire_lease(
        &self,
        id: &Uuid,
        worker: &str,
        now: DateTime<Utc>,
        lease_expires_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        Ok(self.update_task(id, |task| {
            let free = task.lease_owner.is_none()
                || task.lease_owner.as_deref() == Some(worker)
                || task.lease_expires_at.is_none_or(|expires| expires <= now);
            let eligible = task.not_before.is_none_or(|at| at <= now);
            if task.status != TaskStatus::InProgress || !free || !eligible {
                return false;
            }
            task.lease_owner = Some(worker.to_string());
            task.lease_expires_at = Some(lease_expires_at);
            task.updated_at = now;
            true
        }))
    }

    async fn release_lease(
        &self,
        id: &Uuid,
        worker: &str,
        not_before: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        Ok(self.update_task(id, |task| {
            if task.lease_owner.as_deref() != Some(worker) {
                return false;
            }
            task.lease_owner = None;
            task.lease_expires_at = None;
            task.not_before = not_before;
            task.updated_at = at;
            true
        }))
    }

    async fn release_expired_leases(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        Ok(self.with(|inner| {
            let mut released = 0;
            for task in inner.tasks.values_mut() {
                if task.lease_owner.is_some() && task.lease_expires_at.is_some_and(|e| e < now) {
                    task.lease_owner = None;
                    task.lease_expires_at = None;
                    released += 1;
                }
            }
            released
        }))
    }

    async fn set_retry_state(
        &self,
        id: &Uuid,
        retry_count: u32,
        last_error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.update_task(id, |task| {
            task.retry_count = retry_count;
            if let Some(error) = last_error {
                task.last_error = Some(error.to_string());
            }
            task.updated_at = at;
            true
        });
        Ok(())
    }

    async fn list_runnable(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Task>, RepositoryError> {
        Ok(self.with(|inner| {
            let mut tasks: Vec<Task> = inner
                .tasks
                .values()
                .filter(|t| match t.status {
                    TaskStatus::Approved => true,
                    TaskStatus::InProgress => {
                        t.lease_expires_at.is_none_or(|e| e <= now)
                            && t.not_before.is_none_or(|at| at <= now)
                    }
                    _ => false,
                })
                .cloned()
                .collect();
            tasks.sort_by(|a, b| {
                a.priority
                    .rank()
                    .cmp(&b.priority.rank())
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.id.cmp(&b.id))
            });
            tasks.truncate(limit as usize);
            tasks
        }))
    }

    async fn count_by_status(&self) -> Result<Vec<(TaskStatus, u64)>, RepositoryError> {
        Ok(self.with(|inner| {
            TaskStatus::ALL
                .iter()
                .map(|status| {
                    let count = inner.tasks.values().filter(|t| t.status == *status).count();
                    (*status, count as u64)
                })
                .filter(|(_, count)| *count > 0)
                .collect()
        }))
    }

    async fn outcome_counts_since(&self, since: DateTime<Utc>) -> Result<OutcomeCounts, RepositoryError> {
        Ok(self.with(|inner| {
            let mut counts = OutcomeCounts::default();
            for task in inner.tasks.values().filter(|t| t.updated_at >= since) {
                match task.status {
                    TaskStatus::Done => counts.succeeded += 1,
                    TaskStatus::Failed | TaskStatus::Escalated => counts.failed += 1,
                    _ => {}
                }
            }
            counts
        }))
    }

    async fn archive_terminal(&self, before: DateTime<Utc>, at: DateTime<Utc>) -> Result<u64, RepositoryError> {
        Ok(self.with(|inner| {
            let mut archived = 0;
            for task in inner.tasks.values_mut() {
                if task.status.is_terminal() && task.archived_at.is_none() && task.updated_at < before {
                    task.archived_at = Some(at);
                    archived += 1;
                }
            }
            archived
        }))
    }
}

impl CheckpointRepository for MemoryStore {
    async fn append_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), RepositoryError> {
        self.with(|inner| {
            let list = inner.checkpoints.entry(checkpoint.task_id).or_default();
            if list.last().is_some_and(|last| last.step_index >= checkpoint.step_index) {
                return Err(RepositoryError::Conflict(format!(
                    "checkpoint {} of task {} out of order",
                    checkpoint.step_index, checkpoint.task_id
                )));
            }
            list.push(checkpoint.clone());
            Ok(())
        })
    }

    async fn latest_success(&self, task_id: &Uuid) -> Result<Option<Checkpoint>, RepositoryError> {
        Ok(self.with(|inner| {
            inner.checkpoints.get(task_id).and_then(|list| {
                list.iter()
                    .rev()
                    .find(|c| c.outcome == CheckpointOutcome::Success)
                    .cloned()
            })
        }))
    }

    async fn list_checkpoints(&self, task_id: &Uuid) -> Result<Vec<Checkpoint>, RepositoryError> {
        Ok(self.with(|inner| inner.checkpoints.get(task_id).cloned().unwrap_or_default()))
    }

    async fn prune_checkpoints(&self, before: DateTime<Utc>) -> Result<u64, RepositoryError> {
        Ok(self.with(|inner| {
            let prunable: Vec<Uuid> = inner
                .tasks
                .values()
                .filter(|t| {
                    matches!(
                        t.status,
                        TaskStatus::Done | TaskStatus::Rejected | TaskStatus::Expired
                    ) && t.updated_at < before
                })
                .map(|t| t.id)
                .collect();
            prunable
                .iter()
                .filter_map(|id| inner.checkpoints.remove(id))
                .map(|list| list.len() as u64)
                .sum()
        }))
    }
}

impl ApprovalRepository for MemoryStore {
    async fn insert_approval(&self, request: &ApprovalRequest) -> Result<(), RepositoryError> {
        self.with(|inner| {
            let pending = inner
                .approvals
                .iter()
                .any(|r| r.task_id == request.task_id && r.status == ApprovalStatus::Pending);
            if pending {
                return Err(RepositoryError::Conflict(format!(
                    "task {} already awaits approval",
                    request.task_id
                )));
            }
            inner.approvals.push(request.clone());
            Ok(())
        })
    }

    async fn get_approval(&self, id: &Uuid) -> Result<Option<ApprovalRequest>, RepositoryError> {
        Ok(self.with(|inner| inner.approvals.iter().find(|r| r.id == *id).cloned()))
    }

    async fn list_pending_approvals(&self) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        Ok(self.with(|inner| {
            inner
                .approvals
                .iter()
                .filter(|r| r.status == ApprovalStatus::Pending)
                .cloned()
                .collect()
        }))
    }

    async fn list_approvals_for_task(&self, task_id: &Uuid) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        Ok(self.with(|inner| {
            inner
                .approvals
                .iter()
                .filter(|r| r.task_id == *task_id)
                .cloned()
                .collect()
        }))
    }

    async fn resolve_approval(
        &self,
        id: &Uuid,
        status: ApprovalStatus,
        edits: Option<&Value>,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        Ok(self.with(|inner| {
            match inner
                .approvals
                .iter_mut()
                .find(|r| r.id == *id && r.status == ApprovalStatus::Pending)
            {
                Some(request) => {
                    request.status = status;
                    request.edits = edits.cloned();
                    request.decided_at = Some(at);
                    true
                }
                None => false,
            }
        }))
    }

    async fn list_expired_approvals(&self, now: DateTime<Utc>) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        Ok(self.with(|inner| {
            inner
                .approvals
                .iter()
                .filter(|r| r.is_expired(now))
                .cloned()
                .collect()
        }))
    }
}

impl ErrorLogRepository for MemoryStore {
    async fn append_error(&self, record: &ErrorRecord) -> Result<(), RepositoryError> {
        self.with(|inner| inner.errors.push(record.clone()));
        Ok(())
    }

    async fn list_errors_for_task(&self, task_id: &Uuid) -> Result<Vec<ErrorRecord>, RepositoryError> {
        Ok(self.with(|inner| {
            inner
                .errors
                .iter()
                .filter(|e| e.task_id == Some(*task_id))
                .cloned()
                .collect()
        }))
    }

    async fn list_recent_errors(&self, limit: u32) -> Result<Vec<ErrorRecord>, RepositoryError> {
        Ok(self.with(|inner| {
            inner
                .errors
                .iter()
                .rev()
                .take(limit as usize)
                .cloned()
                .collect()
        }))
    }

    async fn count_errors_since(&self, since: DateTime<Utc>) -> Result<u64, RepositoryError> {
        Ok(self.with(|inner| {
            inner
                .errors
                .iter()
                .filter(|e| e.occurred_at >= since)
                .count() as u64
        }))
    }

    async fn prune_errors(&self, before: DateTime<Utc>) -> Result<u64, RepositoryError> {
        Ok(self.with(|inner| {
            let tasks = &inner.tasks;
            let prunable = |record: &ErrorRecord| match record.task_id {
                Some(id) => tasks.get(&id).is_some_and(|t| {
                    matches!(
                        t.status,
                        TaskStatus::Done | TaskStatus::Rejected | TaskStatus::Expired
                    ) && t.updated_at < before
                }),
                None => record.occurred_at < before,
            };
            let kept: Vec<ErrorRecord> = inner.errors.iter().filter(|r| !prunable(r)).cloned().collect();
            let pruned = (inner.errors.len() - kept.len()) as u64;
            inner.errors = kept;
            pruned
        }))
    }
}

impl BreakerRepository for MemoryStore {
    async fn save_breaker(&self, state: &CircuitBreakerState) -> Result<(), RepositoryError> {
        self.with(|inner| {
            inner.breakers.insert(state.dependency.clone(), state.clone());
        });
        Ok(())
    }

    async fn list_breakers(&self) -> Result<Vec<CircuitBreakerState>, RepositoryError> {
        Ok(self.breakers())
    }
}

impl AlertRepository for MemoryStore {
    async fn insert_alert(&self, alert: &Alert) -> Result<(), RepositoryError> {
        self.with(|inner| inner.alerts.push(alert.clone()));
        Ok(())
    }

    async fn get_alert(&self, id: &Uuid) -> Result<Option<Alert>, RepositoryError> {
        Ok(self.with(|inner| inner.alerts.iter().find(|a| a.id == *id).cloned()))
    }

    async fn list_alerts(&self, include_resolved: bool) -> Result<Vec<Alert>, RepositoryError> {
        Ok(self.with(|inner| {
            inner
                .alerts
                .iter()
                .rev()
                .filter(|a| include_resolved || !a.is_resolved())
                .cloned()
                .collect()
        }))
    }

    async fn resolve_alert(&self, id: &Uuid, note: Option<&str>, at: DateTime<Utc>) -> Result<bool, RepositoryError> {
        Ok(self.with(|inner| {
            match inner
                .alerts
                .iter_mut()
                .find(|a| a.id == *id && a.resolved_at.is_none())
            {
                Some(alert) => {
                    alert.resolved_at = Some(at);
                    alert.resolution_note = note.map(str::to_string);
                    true
                }
                None => false,
            }
        }))
    }

    async fn prune_alerts(&self, before: DateTime<Utc>) -> Result<u64, RepositoryError> {
        Ok(self.with(|inner| {
            let total = inner.alerts.len();
            inner
                .alerts
                .retain(|a| !a.resolved_at.is_some_and(|at| at < before));
            (total - inner.alerts.len()) as u64
        }))
    }
}

// ---------------------------------------------------------------------------
// Planner and payload fixtures
// ---------------------------------------------------------------------------

pub struct StaticPlanner {
    result: Result<Vec<PlanStep>, PlanningError>,
}

impl StaticPlanner {
    pub fn new(plan: Vec<PlanStep>) -> Self {
        Self { result: Ok(plan) }
    }

    pub fn failing(err: PlanningError) -> Self {
        Self { result: Err(err) }
    }
}

impl Planner for StaticPlanner {
    async fn plan(&self, _task: &Task) -> Result<Vec<PlanStep>, PlanningError> {
        self.result.clone()
    }
}

pub fn email_payload() -> TaskPayload {
    TaskPayload::Email {
        to: "client@example.com".to_string(),
        subject: "Invoice".to_string(),
        body: "Attached.".to_string(),
    }
}

/// Steps named as given, all against the "email" dependency.
pub fn plan_of(steps: &[(&str, bool)]) -> Vec<PlanStep> {
    steps
        .iter()
        .map(|(name, irreversible)| {
            let step = PlanStep::new(*name, format!("email.{name}"), "email");
            if *irreversible { step.irreversible() } else { step }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// ScriptedConnector
// ---------------------------------------------------------------------------

/// One scripted response. Once the script runs out every call echoes.
pub enum Script {
    Ok,
    Fail(ConnectorError),
    /// Never returns; exercises the per-call timeout.
    Hang,
    /// Another worker takes the lease while the call is in flight.
    StealLease,
}

#[derive(Default)]
struct ScriptState {
    script: VecDeque<Script>,
    calls: Vec<StepCall>,
    refreshes: bool,
    store: Option<MemoryStore>,
}

#[derive(Clone, Default)]
pub struct ScriptedConnector {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedConnector {
    pub fn new(script: Vec<Script>) -> Self {
        let connector = Self::default();
        connector.state.lock().unwrap().script = script.into();
        connector
    }

    pub fn echo() -> Self {
        Self::default()
    }

    pub fn refreshes(self, refreshes: bool) -> Self {
        self.state.lock().unwrap().refreshes = refreshes;
        self
    }

    pub fn attach_store(&self, store: MemoryStore) {
        self.state.lock().unwrap().store = Some(store);
    }

    pub fn calls(&self) -> Vec<StepCall> {
        self.state.lock().unwrap().calls.clone()
    }
}

impl Connector for ScriptedConnector {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, call: &StepCall) -> Result<Value, ConnectorError> {
        let (next, store) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(call.clone());
            (state.script.pop_front(), state.store.clone())
        };
        match next {
            None | Some(Script::Ok) => Ok(json!({"step": call.step.name})),
            Some(Script::Fail(err)) => Err(err),
            Some(Script::Hang) => {
                std::future::pending::<()>().await;
                Ok(Value::Null)
            }
            Some(Script::StealLease) => {
                if let Some(store) = store {
                    store.steal_lease(call.task_id, "thief");
                }
                Ok(json!({"step": call.step.name}))
            }
        }
    }

    async fn refresh_credentials(&self) -> bool {
        self.state.lock().unwrap().refreshes
    }
}
