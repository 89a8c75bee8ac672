//! Checkpointed execution engine.
//!
//! Drives an IN_PROGRESS task through its plan one step per call. Each call
//! takes the task's lease, runs the next uncheckpointed step through the
//! dependency's circuit breaker with a per-call timeout, and then either
//! commits a checkpoint or applies the failure policy:
//!
//! - retryable kinds are retried with backoff by deferring the task
//!   (`not_before`) and counting the attempt in `retry_count`
//! - exhausted retries and Permission/DataIntegrity failures escalate
//! - other fatal failures fail the task
//! - an open circuit defers the task until the cooldown ends, or escalates
//!   it immediately for critical-priority tasks
//!
//! Terminal failures write a failure checkpoint and dispatch an alert. The
//! lease is released after every step, so priorities are re-evaluated and
//! cancellations take effect between steps.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use steward_types::config::StewardConfig;
use steward_types::error::{CircuitOpenError, RepositoryError};
use steward_types::event::OrchestratorEvent;
use steward_types::failure::{ErrorKind, ErrorRecord, Severity};
use steward_types::task::{PlanStep, Task, TaskPriority, TaskStatus};
use uuid::Uuid;

use crate::clock::Clock;
use crate::event::bus::EventBus;
use crate::execution::checkpoint::{CheckpointError, CheckpointManager};
use crate::execution::connector::{BoxConnector, ConnectorError, ConnectorRegistry, StepCall};
use crate::lifecycle::controller::{TaskController, TransitionError};
use crate::monitor::escalation::{AlertDraft, EscalationDispatcher};
use crate::recovery::breaker::CircuitBreakerRegistry;
use crate::recovery::classifier::classify;
use crate::recovery::retry::{RetryDecision, RetryPolicy};
use crate::repository::Store;

// ---------------------------------------------------------------------------
// StepOutcome
// ---------------------------------------------------------------------------

/// Result of one scheduling turn on a task.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// A step committed; more steps remain.
    Advanced { step_index: u32 },
    /// The last step committed and the task is DONE.
    Completed,
    /// The step failed with a retryable error and will run again.
    Retrying {
        step_index: u32,
        attempt: u32,
        not_before: DateTime<Utc>,
    },
    /// The step's dependency is open; the task waits for the cooldown.
    Deferred {
        dependency: String,
        until: DateTime<Utc>,
    },
    Failed { reason: String },
    Escalated { reason: String },
    /// Nothing to do for this worker now: the task is not runnable, its
    /// lease is held elsewhere, or its backoff has not elapsed.
    Skipped,
    /// The lease was lost while the call was in flight; its result was
    /// discarded.
    Discarded,
}

impl StepOutcome {
    /// Whether the turn did work worth scheduling another turn immediately.
    pub fn made_progress(&self) -> bool {
        !matches!(self, StepOutcome::Skipped)
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("storage error: {0}")]
    Repository(#[from] RepositoryError),
}

/// How a task leaves IN_PROGRESS after an unrecoverable step failure.
struct Termination {
    escalate: bool,
    kind: Option<ErrorKind>,
    severity: Severity,
    reason: String,
}

// ---------------------------------------------------------------------------
// ExecutionEngine
// ---------------------------------------------------------------------------

pub struct ExecutionEngine<S: Store> {
    store: S,
    controller: Arc<TaskController<S>>,
    checkpoints: CheckpointManager<S>,
    breakers: Arc<CircuitBreakerRegistry<S>>,
    dispatcher: Arc<EscalationDispatcher<S>>,
    connectors: ConnectorRegistry,
    retry: RetryPolicy,
    step_timeout: Duration,
    clock: Arc<dyn Clock>,
    bus: EventBus,
}

impl<S: Store> ExecutionEngine<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: S,
        controller: Arc<TaskController<S>>,
        breakers: Arc<CircuitBreakerRegistry<S>>,
        dispatcher: Arc<EscalationDispatcher<S>>,
        connectors: ConnectorRegistry,
        config: &StewardConfig,
        clock: Arc<dyn Clock>,
        bus: EventBus,
    ) -> Self {
        Self {
            checkpoints: CheckpointManager::new(store.clone()),
            store,
            controller,
            breakers,
            dispatcher,
            connectors,
            retry: RetryPolicy::from_config(&config.retry),
            step_timeout: config.workers.step_timeout(),
            clock,
            bus,
        }
    }

    pub fn checkpoints(&self) -> &CheckpointManager<S> {
        &self.checkpoints
    }

    /// Pick the most urgent runnable task and run one step of it.
    ///
    /// Returns `None` when no candidate yielded any work.
    pub async fn run_once(
        &self,
        worker: &str,
        batch: u32,
    ) -> Result<Option<(Uuid, StepOutcome)>, EngineError> {
        let candidates = self.store.list_runnable(self.clock.now(), batch).await?;
        for task in candidates {
            let outcome = self.run_next_step(task.id, worker).await?;
            if outcome.made_progress() {
                return Ok(Some((task.id, outcome)));
            }
        }
        Ok(None)
    }

    /// Run the next uncheckpointed step of a task as `worker`.
    pub async fn run_next_step(&self, task_id: Uuid, worker: &str) -> Result<StepOutcome, EngineError> {
        let Some(task) = self.claim(task_id, worker).await? else {
            return Ok(StepOutcome::Skipped);
        };

        let resume = self.checkpoints.resume_point(task_id).await?;
        let Some(step) = task.plan.get(resume.next_step as usize).cloned() else {
            // Every step is checkpointed; a crash hit between the last commit
            // and completion.
            self.controller.complete(task_id).await?;
            return Ok(StepOutcome::Completed);
        };
        let step_index = resume.next_step;

        let Some(connector) = self.connectors.resolve(&step.action).cloned() else {
            let termination = Termination {
                escalate: false,
                kind: None,
                severity: Severity::High,
                reason: format!("no connector registered for action '{}'", step.action),
            };
            return self.terminate(&task, step_index, &step, termination).await;
        };

        if let Err(open) = self.breakers.acquire(&step.dependency).await {
            return self.on_circuit_open(&task, step_index, &step, worker, open).await;
        }

        let call = StepCall {
            task_id,
            step_index,
            step: step.clone(),
            payload: task.payload.clone(),
            prior_state: resume.prior_state,
            idempotency_key: StepCall::idempotency_key_for(task_id, step_index),
        };
        tracing::debug!(
            task_id = %task_id,
            step_index,
            step = %step.name,
            action = %step.action,
            attempt = task.retry_count,
            "invoking step"
        );
        let result = match tokio::time::timeout(self.step_timeout, connector.invoke(&call)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectorError::timed_out(self.step_timeout)),
        };

        match result {
            Ok(output) => {
                self.breakers.record_success(&step.dependency).await;
                if !self.still_holds(task_id, worker).await? {
                    return Ok(self.discard(task_id, step_index));
                }
                self.on_success(&task, step_index, &step, worker, output).await
            }
            Err(err) => {
                let kind = classify(&err);
                let now = self.clock.now();
                let record = ErrorRecord::new(&step.dependency, kind, err.to_string(), now)
                    .for_step(task_id, step_index, task.retry_count);
                self.store.append_error(&record).await?;
                self.breakers
                    .record_failure(&step.dependency, kind, &err.message)
                    .await;
                if !self.still_holds(task_id, worker).await? {
                    return Ok(self.discard(task_id, step_index));
                }
                self.on_failure(&task, step_index, &step, worker, &connector, kind, &err)
                    .await
            }
        }
    }

    /// Release expired leases so their tasks resume after their last
    /// checkpoint. Returns the IN_PROGRESS tasks awaiting resumption.
    pub async fn recover(&self) -> Result<Vec<Uuid>, EngineError> {
        let now = self.clock.now();
        let released = self.store.release_expired_leases(now).await?;
        let in_progress = self
            .store
            .list_tasks(Some(TaskStatus::InProgress), u32::MAX)
            .await?;
        for task in &in_progress {
            let resume = self.checkpoints.resume_point(task.id).await?;
            tracing::info!(
                task_id = %task.id,
                next_step = resume.next_step,
                steps = task.plan.len(),
                leased = task.lease_owner.is_some(),
                "task awaiting resumption"
            );
        }
        if released > 0 {
            tracing::warn!(released, "released expired leases");
        }
        Ok(in_progress.into_iter().map(|t| t.id).collect())
    }

    // -----------------------------------------------------------------------
    // Turn phases
    // -----------------------------------------------------------------------

    /// Take the task's lease, starting execution if it is APPROVED.
    async fn claim(&self, task_id: Uuid, worker: &str) -> Result<Option<Task>, EngineError> {
        let now = self.clock.now();
        let task = self.controller.task(task_id).await?;
        if task.not_before.is_some_and(|at| at > now) {
            return Ok(None);
        }
        match task.status {
            TaskStatus::Approved => match self.controller.begin_execution(task_id, worker).await {
                Ok(task) => Ok(Some(task)),
                Err(TransitionError::InvalidTransition { .. }) => Ok(None),
                Err(e) => Err(e.into()),
            },
            TaskStatus::InProgress => {
                let expires = now + self.controller.lease_ttl();
                if self.store.acquire_lease(&task_id, worker, now, expires).await? {
                    Ok(Some(self.controller.task(task_id).await?))
                } else {
                    Ok(None)
                }
            }
            _ => Ok(None),
        }
    }

    async fn still_holds(&self, task_id: Uuid, worker: &str) -> Result<bool, EngineError> {
        let task = self.store.get_task(&task_id).await?;
        Ok(task.is_some_and(|t| {
            t.status == TaskStatus::InProgress && t.lease_owner.as_deref() == Some(worker)
        }))
    }

    fn discard(&self, task_id: Uuid, step_index: u32) -> StepOutcome {
        tracing::warn!(task_id = %task_id, step_index, "lease lost during call, result discarded");
        StepOutcome::Discarded
    }

    async fn on_success(
        &self,
        task: &Task,
        step_index: u32,
        step: &PlanStep,
        worker: &str,
        output: serde_json::Value,
    ) -> Result<StepOutcome, EngineError> {
        let now = self.clock.now();
        match self
            .checkpoints
            .commit_success(task.id, step_index, &step.name, output, now)
            .await
        {
            Ok(_) => {}
            Err(CheckpointError::OutOfOrder { .. }) => return Ok(self.discard(task.id, step_index)),
            Err(e) => return Err(e.into()),
        }
        if task.retry_count > 0 {
            self.store.set_retry_state(&task.id, 0, None, now).await?;
        }
        self.bus.publish(OrchestratorEvent::StepCommitted {
            task_id: task.id,
            step_index,
            step_name: step.name.clone(),
        });

        if step_index as usize + 1 >= task.plan.len() {
            self.controller.complete(task.id).await?;
            tracing::info!(task_id = %task.id, steps = task.plan.len(), "task completed");
            Ok(StepOutcome::Completed)
        } else {
            self.store.release_lease(&task.id, worker, None, now).await?;
            Ok(StepOutcome::Advanced { step_index })
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn on_failure(
        &self,
        task: &Task,
        step_index: u32,
        step: &PlanStep,
        worker: &str,
        connector: &BoxConnector,
        kind: ErrorKind,
        err: &ConnectorError,
    ) -> Result<StepOutcome, EngineError> {
        let attempt = task.retry_count;
        let decision = if kind == ErrorKind::Authentication && !connector.refresh_credentials().await {
            tracing::warn!(task_id = %task.id, connector = connector.name(), "credential refresh failed");
            RetryDecision::Fatal
        } else {
            self.retry.decide(kind, attempt)
        };

        self.bus.publish(OrchestratorEvent::StepFailed {
            task_id: task.id,
            step_index,
            kind,
            attempt,
            will_retry: matches!(decision, RetryDecision::RetryAfter(_)),
        });

        match decision {
            RetryDecision::RetryAfter(delay) => {
                let now = self.clock.now();
                let not_before = now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                self.store
                    .set_retry_state(&task.id, attempt + 1, Some(&err.to_string()), now)
                    .await?;
                self.store
                    .release_lease(&task.id, worker, Some(not_before), now)
                    .await?;
                tracing::info!(
                    task_id = %task.id,
                    step_index,
                    kind = %kind,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "step failed, retry scheduled"
                );
                Ok(StepOutcome::Retrying {
                    step_index,
                    attempt,
                    not_before,
                })
            }
            RetryDecision::Exhausted => {
                let termination = Termination {
                    escalate: true,
                    kind: Some(kind),
                    severity: kind.default_severity(),
                    reason: format!(
                        "step '{}' failed {} times ({kind}): {err}",
                        step.name,
                        attempt + 1
                    ),
                };
                self.terminate(task, step_index, step, termination).await
            }
            RetryDecision::Fatal => {
                let termination = Termination {
                    escalate: kind.requires_human(),
                    kind: Some(kind),
                    severity: kind.default_severity(),
                    reason: format!("step '{}' failed ({kind}): {err}", step.name),
                };
                self.terminate(task, step_index, step, termination).await
            }
        }
    }

    async fn on_circuit_open(
        &self,
        task: &Task,
        step_index: u32,
        step: &PlanStep,
        worker: &str,
        open: CircuitOpenError,
    ) -> Result<StepOutcome, EngineError> {
        if task.priority == TaskPriority::Critical {
            let termination = Termination {
                escalate: true,
                kind: None,
                severity: Severity::Critical,
                reason: format!(
                    "critical task blocked: dependency '{}' unavailable until {}",
                    open.dependency, open.retry_after
                ),
            };
            return self.terminate(task, step_index, step, termination).await;
        }

        let now = self.clock.now();
        self.store
            .release_lease(&task.id, worker, Some(open.retry_after), now)
            .await?;
        tracing::info!(
            task_id = %task.id,
            dependency = %open.dependency,
            until = %open.retry_after,
            "task deferred on open circuit"
        );
        self.bus.publish(OrchestratorEvent::TaskDeferred {
            task_id: task.id,
            dependency: open.dependency.clone(),
            until: open.retry_after,
        });
        Ok(StepOutcome::Deferred {
            dependency: open.dependency,
            until: open.retry_after,
        })
    }

    /// Record the failure checkpoint, leave IN_PROGRESS, and alert a human.
    async fn terminate(
        &self,
        task: &Task,
        step_index: u32,
        step: &PlanStep,
        termination: Termination,
    ) -> Result<StepOutcome, EngineError> {
        let now = self.clock.now();
        let state = json!({
            "error": termination.reason,
            "kind": termination.kind,
            "attempts": task.retry_count + 1,
        });
        match self
            .checkpoints
            .commit_failure(task.id, step_index, &step.name, state, now)
            .await
        {
            Ok(_) | Err(CheckpointError::OutOfOrder { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        let (verb, outcome) = if termination.escalate {
            self.controller.escalate(task.id, &termination.reason).await?;
            (
                "escalated",
                StepOutcome::Escalated {
                    reason: termination.reason.clone(),
                },
            )
        } else {
            self.controller.fail(task.id, &termination.reason).await?;
            (
                "failed",
                StepOutcome::Failed {
                    reason: termination.reason.clone(),
                },
            )
        };

        self.dispatcher
            .dispatch(AlertDraft {
                severity: termination.severity,
                source: "engine".to_string(),
                title: format!("{} task {} {verb} at step '{}'", task.kind, task.id, step.name),
                detail: termination.reason,
                task_id: Some(task.id),
            })
            .await?;
        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::repository::{AlertRepository, ErrorLogRepository, TaskRepository};
    use crate::test_support::{
        MemoryStore, Script, ScriptedConnector, StaticPlanner, email_payload, plan_of,
    };
    use steward_types::breaker::CircuitState;
    use steward_types::checkpoint::CheckpointOutcome;
    use steward_types::task::TaskPayload;

    struct Harness {
        engine: ExecutionEngine<MemoryStore>,
        controller: Arc<TaskController<MemoryStore>>,
        breakers: Arc<CircuitBreakerRegistry<MemoryStore>>,
        store: MemoryStore,
        clock: Arc<ManualClock>,
    }

    fn harness(connector: ScriptedConnector) -> Harness {
        harness_with(connector, StewardConfig::default())
    }

    fn harness_with(connector: ScriptedConnector, config: StewardConfig) -> Harness {
        let store = MemoryStore::default();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let bus = EventBus::new(256);
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
        let mut connectors = ConnectorRegistry::new();
        connectors.set_fallback(connector);
        let engine = ExecutionEngine::new(
            store.clone(),
            controller.clone(),
            breakers.clone(),
            dispatcher,
            connectors,
            &config,
            clock.clone(),
            bus,
        );
        Harness {
            engine,
            controller,
            breakers,
            store,
            clock,
        }
    }

    async fn approved_task(h: &Harness, steps: &[(&str, bool)], priority: TaskPriority) -> Uuid {
        let task = h.controller.submit(email_payload(), priority).await.unwrap();
        let planner = StaticPlanner::new(plan_of(steps));
        let task = h.controller.admit(task.id, &planner).await.unwrap();
        assert_eq!(task.status, TaskStatus::Approved);
        task.id
    }

    const THREE_STEPS: &[(&str, bool)] = &[("one", false), ("two", false), ("three", false)];

    #[tokio::test]
    async fn runs_all_steps_to_done_with_state_carry_over() {
        let connector = ScriptedConnector::echo();
        let h = harness(connector.clone());
        let id = approved_task(&h, THREE_STEPS, TaskPriority::Medium).await;

        assert_eq!(
            h.engine.run_next_step(id, "w1").await.unwrap(),
            StepOutcome::Advanced { step_index: 0 }
        );
        // Lease released between steps.
        assert!(h.controller.task(id).await.unwrap().lease_owner.is_none());
        assert_eq!(
            h.engine.run_next_step(id, "w1").await.unwrap(),
            StepOutcome::Advanced { step_index: 1 }
        );
        assert_eq!(h.engine.run_next_step(id, "w1").await.unwrap(), StepOutcome::Completed);

        let task = h.controller.task(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Done);
        assert!(task.lease_owner.is_none());

        let calls = connector.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].prior_state["step"], "one");
        assert_eq!(calls[2].prior_state["step"], "two");
        assert_eq!(calls[2].idempotency_key, format!("{id}-2"));

        let history = h.engine.checkpoints().history(id).await.unwrap();
        let indexes: Vec<u32> = history.iter().map(|c| c.step_index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn resume_after_crash_skips_checkpointed_steps() {
        // Uninterrupted reference run.
        let reference = ScriptedConnector::echo();
        let h_ref = harness(reference.clone());
        let ref_id = approved_task(&h_ref, THREE_STEPS, TaskPriority::Medium).await;
        while h_ref.engine.run_next_step(ref_id, "w1").await.unwrap() != StepOutcome::Completed {}

        // Crashed run: step 0 commits, then the worker dies holding the lease
        // of step 1 before committing it.
        let connector = ScriptedConnector::echo();
        let h = harness(connector.clone());
        let id = approved_task(&h, THREE_STEPS, TaskPriority::Medium).await;
        h.engine.run_next_step(id, "w1").await.unwrap();
        let now = h.clock.now();
        assert!(h
            .store
            .acquire_lease(&id, "w1", now, now + chrono::Duration::seconds(300))
            .await
            .unwrap());

        // Another worker cannot take it while the lease is live.
        assert_eq!(h.engine.run_next_step(id, "w2").await.unwrap(), StepOutcome::Skipped);

        h.clock.advance(chrono::Duration::seconds(301));
        let resumable = h.engine.recover().await.unwrap();
        assert_eq!(resumable, vec![id]);

        let mut last = StepOutcome::Skipped;
        while last != StepOutcome::Completed {
            last = h.engine.run_next_step(id, "w2").await.unwrap();
        }

        let names: Vec<String> = connector.calls().iter().map(|c| c.step.name.clone()).collect();
        assert_eq!(names, vec!["one", "two", "three"]);
        assert_eq!(
            h.controller.task(id).await.unwrap().status,
            h_ref.controller.task(ref_id).await.unwrap().status
        );
    }

    #[tokio::test]
    async fn completes_when_all_steps_already_checkpointed() {
        let connector = ScriptedConnector::echo();
        let h = harness(connector.clone());
        let id = approved_task(&h, &[("only", false)], TaskPriority::Low).await;
        h.controller.begin_execution(id, "w1").await.unwrap();
        h.engine
            .checkpoints()
            .commit_success(id, 0, "only", serde_json::Value::Null, h.clock.now())
            .await
            .unwrap();
        h.store
            .release_lease(&id, "w1", None, h.clock.now())
            .await
            .unwrap();

        assert_eq!(h.engine.run_next_step(id, "w2").await.unwrap(), StepOutcome::Completed);
        assert!(connector.calls().is_empty());
    }

    #[tokio::test]
    async fn repeated_timeout_escalates_with_medium_alert() {
        let connector = ScriptedConnector::new(vec![
            Script::Ok,
            Script::Fail(ConnectorError::new("upstream timed out")),
            Script::Fail(ConnectorError::new("upstream timed out")),
            Script::Fail(ConnectorError::new("upstream timed out")),
        ]);
        let h = harness(connector.clone());
        let id = approved_task(&h, THREE_STEPS, TaskPriority::Medium).await;

        assert_eq!(
            h.engine.run_next_step(id, "w1").await.unwrap(),
            StepOutcome::Advanced { step_index: 0 }
        );

        let mut delays = Vec::new();
        for attempt in 0..2 {
            let before = h.clock.now();
            match h.engine.run_next_step(id, "w1").await.unwrap() {
                StepOutcome::Retrying {
                    step_index,
                    attempt: a,
                    not_before,
                } => {
                    assert_eq!(step_index, 1);
                    assert_eq!(a, attempt);
                    delays.push((not_before - before).num_milliseconds());
                    // Not runnable before the backoff elapses.
                    assert_eq!(h.engine.run_next_step(id, "w1").await.unwrap(), StepOutcome::Skipped);
                    h.clock.set(not_before);
                }
                other => panic!("expected retry, got {other:?}"),
            }
        }
        assert!((2_000..2_200).contains(&delays[0]), "{delays:?}");
        assert!((4_000..4_400).contains(&delays[1]), "{delays:?}");

        let outcome = h.engine.run_next_step(id, "w1").await.unwrap();
        assert!(matches!(outcome, StepOutcome::Escalated { .. }), "{outcome:?}");

        // No fourth attempt.
        assert_eq!(connector.calls().len(), 4);
        let task = h.controller.task(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Escalated);
        assert!(task.lease_owner.is_none());

        let errors = h.store.list_errors_for_task(&id).await.unwrap();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().all(|e| e.kind == ErrorKind::Timeout));
        let attempts: Vec<u32> = errors.iter().map(|e| e.attempt).collect();
        assert_eq!(attempts, vec![0, 1, 2]);

        let alerts = h.store.list_alerts(false).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Medium);
        assert_eq!(alerts[0].task_id, Some(id));

        let history = h.engine.checkpoints().history(id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].outcome, CheckpointOutcome::Failure);
        assert_eq!(history[1].step_index, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn per_call_timeout_is_classified_as_timeout() {
        let connector = ScriptedConnector::new(vec![Script::Hang]);
        let mut config = StewardConfig::default();
        config.workers.step_timeout_secs = 1;
        let h = harness_with(connector, config);
        let id = approved_task(&h, &[("slow", false)], TaskPriority::Low).await;

        let outcome = h.engine.run_next_step(id, "w1").await.unwrap();
        assert!(matches!(outcome, StepOutcome::Retrying { attempt: 0, .. }), "{outcome:?}");
        let errors = h.store.list_errors_for_task(&id).await.unwrap();
        assert_eq!(errors[0].kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn permission_error_escalates_immediately() {
        let connector = ScriptedConnector::new(vec![Script::Fail(
            ConnectorError::new("forbidden").with_status(403),
        )]);
        let h = harness(connector.clone());
        let id = approved_task(&h, &[("post", false)], TaskPriority::Low).await;

        let outcome = h.engine.run_next_step(id, "w1").await.unwrap();
        assert!(matches!(outcome, StepOutcome::Escalated { .. }));
        assert_eq!(connector.calls().len(), 1);
        let alerts = h.store.list_alerts(false).await.unwrap();
        assert_eq!(alerts[0].severity, Severity::High);
    }

    #[tokio::test]
    async fn unknown_error_fails_task() {
        let connector = ScriptedConnector::new(vec![Script::Fail(ConnectorError::new("weird"))]);
        let h = harness(connector);
        let id = approved_task(&h, &[("x", false)], TaskPriority::Low).await;
        let outcome = h.engine.run_next_step(id, "w1").await.unwrap();
        assert!(matches!(outcome, StepOutcome::Failed { .. }));
        assert_eq!(h.controller.task(id).await.unwrap().status, TaskStatus::Failed);
        assert_eq!(h.store.list_errors_for_task(&id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn authentication_retries_only_after_refresh() {
        let refreshing = ScriptedConnector::new(vec![
            Script::Fail(ConnectorError::new("unauthorized").with_status(401)),
            Script::Ok,
        ])
        .refreshes(true);
        let h = harness(refreshing.clone());
        let id = approved_task(&h, &[("send", false)], TaskPriority::Low).await;
        let outcome = h.engine.run_next_step(id, "w1").await.unwrap();
        let StepOutcome::Retrying { not_before, .. } = outcome else {
            panic!("expected retry, got {outcome:?}");
        };
        h.clock.set(not_before);
        assert_eq!(h.engine.run_next_step(id, "w1").await.unwrap(), StepOutcome::Completed);
        assert_eq!(h.controller.task(id).await.unwrap().retry_count, 0);

        let stale = ScriptedConnector::new(vec![Script::Fail(
            ConnectorError::new("unauthorized").with_status(401),
        )]);
        let h = harness(stale);
        let id = approved_task(&h, &[("send", false)], TaskPriority::Low).await;
        let outcome = h.engine.run_next_step(id, "w1").await.unwrap();
        assert!(matches!(outcome, StepOutcome::Failed { .. }));
        let alerts = h.store.list_alerts(false).await.unwrap();
        assert_eq!(alerts[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn open_circuit_defers_without_calling() {
        let connector = ScriptedConnector::echo();
        let h = harness(connector.clone());
        for _ in 0..5 {
            h.breakers
                .record_failure("email", ErrorKind::Connection, "connection refused")
                .await;
        }
        let id = approved_task(&h, &[("send", false)], TaskPriority::High).await;

        let outcome = h.engine.run_next_step(id, "w1").await.unwrap();
        let StepOutcome::Deferred { dependency, until } = outcome else {
            panic!("expected deferral, got {outcome:?}");
        };
        assert_eq!(dependency, "email");
        assert_eq!(until, h.clock.now() + chrono::Duration::seconds(30));
        assert!(connector.calls().is_empty());

        let task = h.controller.task(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.retry_count, 0);
        assert!(task.lease_owner.is_none());
        assert_eq!(h.engine.run_next_step(id, "w1").await.unwrap(), StepOutcome::Skipped);

        // After the cooldown the task runs as the breaker's probe.
        h.clock.set(until);
        assert_eq!(h.engine.run_next_step(id, "w1").await.unwrap(), StepOutcome::Completed);
        assert_eq!(h.breakers.state_of("email").unwrap().state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn open_circuit_escalates_critical_task() {
        let connector = ScriptedConnector::echo();
        let h = harness(connector.clone());
        for _ in 0..5 {
            h.breakers
                .record_failure("email", ErrorKind::Connection, "connection refused")
                .await;
        }
        let id = approved_task(&h, &[("send", false)], TaskPriority::Critical).await;
        let outcome = h.engine.run_next_step(id, "w1").await.unwrap();
        assert!(matches!(outcome, StepOutcome::Escalated { .. }));
        assert!(connector.calls().is_empty());
        let alerts = h.store.list_alerts(false).await.unwrap();
        assert_eq!(alerts[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn rejected_task_never_executes() {
        let connector = ScriptedConnector::echo();
        let h = harness(connector.clone());
        let task = h.controller.submit(email_payload(), TaskPriority::Low).await.unwrap();
        let planner = StaticPlanner::new(plan_of(&[("send", true)]));
        h.controller.admit(task.id, &planner).await.unwrap();
        let request = h.store.pending_request_for(task.id).unwrap();
        h.controller
            .resolve_approval(request.id, steward_types::approval::ApprovalDecision::reject())
            .await
            .unwrap();

        assert_eq!(h.engine.run_next_step(task.id, "w1").await.unwrap(), StepOutcome::Skipped);
        assert!(h.engine.run_once("w1", 10).await.unwrap().is_none());
        assert!(connector.calls().is_empty());
    }

    #[tokio::test]
    async fn result_discarded_when_lease_lost_mid_call() {
        let connector = ScriptedConnector::new(vec![Script::StealLease]);
        let h = harness(connector.clone());
        connector.attach_store(h.store.clone());
        let id = approved_task(&h, &[("a", false), ("b", false)], TaskPriority::Low).await;

        assert_eq!(h.engine.run_next_step(id, "w1").await.unwrap(), StepOutcome::Discarded);
        assert!(h.engine.checkpoints().history(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_once_prefers_critical_tasks() {
        let connector = ScriptedConnector::echo();
        let h = harness(connector);
        let low = approved_task(&h, &[("a", false)], TaskPriority::Low).await;
        let critical = approved_task(&h, &[("a", false)], TaskPriority::Critical).await;

        let (first, _) = h.engine.run_once("w1", 10).await.unwrap().unwrap();
        assert_eq!(first, critical);
        let (second, _) = h.engine.run_once("w1", 10).await.unwrap().unwrap();
        assert_eq!(second, low);
        assert!(h.engine.run_once("w1", 10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_connector_fails_task() {
        let h = harness(ScriptedConnector::echo());
        let store = h.store.clone();
        let clock = h.clock.clone();
        let config = StewardConfig::default();
        let bus = EventBus::new(16);
        let engine = ExecutionEngine::new(
            store.clone(),
            h.controller.clone(),
            h.breakers.clone(),
            Arc::new(EscalationDispatcher::new(
                store.clone(),
                &config.alerts,
                clock.clone(),
                bus.clone(),
            )),
            ConnectorRegistry::new(),
            &config,
            clock,
            bus,
        );
        let task = h
            .controller
            .submit(
                TaskPayload::FileDrop {
                    path: "inbox/x.md".to_string(),
                },
                TaskPriority::Low,
            )
            .await
            .unwrap();
        let planner = StaticPlanner::new(plan_of(&[("ingest", false)]));
        h.controller.admit(task.id, &planner).await.unwrap();

        let outcome = engine.run_next_step(task.id, "w1").await.unwrap();
        let StepOutcome::Failed { reason } = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(reason.contains("no connector"));
    }
}
