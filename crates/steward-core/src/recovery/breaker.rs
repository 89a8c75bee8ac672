//! Per-dependency circuit breakers.
//!
//! `CircuitBreaker` is the pure state machine for one dependency;
//! `CircuitBreakerRegistry` owns one breaker per dependency id, persists
//! every state change, and publishes breaker transitions on the event bus.
//!
//! ```text
//! CLOSED --(threshold failures within window)--> OPEN
//! OPEN --(cooldown elapsed, next acquire)--> HALF_OPEN (one probe admitted)
//! HALF_OPEN --probe success--> CLOSED (counters reset)
//! HALF_OPEN --probe failure--> OPEN (cooldown restarts)
//! ```
//!
//! While the probe is outstanding every other caller is turned away. A probe
//! that never reports back (its worker died) stops blocking after
//! `probe_timeout`, which outlasts the per-step timeout.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use steward_types::breaker::{CircuitBreakerState, CircuitState};
use steward_types::config::BreakerConfig;
use steward_types::error::{CircuitOpenError, RepositoryError};
use steward_types::event::OrchestratorEvent;
use steward_types::failure::ErrorKind;

use crate::clock::Clock;
use crate::event::bus::EventBus;
use crate::repository::BreakerRepository;

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

/// How a call was admitted through the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Breaker closed; normal call.
    Pass,
    /// The single half-open probe.
    Probe,
}

// ---------------------------------------------------------------------------
// CircuitBreaker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: CircuitBreakerState,
    /// When the outstanding half-open probe was admitted.
    probe_started_at: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    pub fn new(dependency: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::from_state(CircuitBreakerState::closed(dependency, now))
    }

    /// Restore from persisted state. A probe in flight before a restart is
    /// forgotten, so the next acquire may probe again.
    pub fn from_state(state: CircuitBreakerState) -> Self {
        Self {
            state,
            probe_started_at: None,
        }
    }

    pub fn state(&self) -> &CircuitBreakerState {
        &self.state
    }

    /// Ask to make a call. Open breakers fail fast; a half-open breaker
    /// admits exactly one probe until it reports back or is abandoned.
    pub fn try_acquire(
        &mut self,
        config: &BreakerConfig,
        now: DateTime<Utc>,
    ) -> Result<Admission, CircuitOpenError> {
        match self.state.state {
            CircuitState::Closed => Ok(Admission::Pass),
            CircuitState::Open => {
                let opened_at = self.state.opened_at.unwrap_or(self.state.last_transition_at);
                let reopen_at = opened_at + config.cooldown();
                if now >= reopen_at {
                    self.move_to(CircuitState::HalfOpen, now);
                    self.probe_started_at = Some(now);
                    Ok(Admission::Probe)
                } else {
                    Err(self.open_error(reopen_at))
                }
            }
            CircuitState::HalfOpen => match self.probe_started_at {
                Some(started) if now < started + config.probe_timeout() => {
                    // Check back after a cooldown; the probe may have settled.
                    let deadline = started + config.probe_timeout();
                    Err(self.open_error((now + config.cooldown()).min(deadline)))
                }
                _ => {
                    self.probe_started_at = Some(now);
                    Ok(Admission::Probe)
                }
            },
        }
    }

    /// A call reached the dependency and it answered.
    pub fn record_success(&mut self, now: DateTime<Utc>) {
        if self.state.state != CircuitState::Closed {
            self.move_to(CircuitState::Closed, now);
            self.state.opened_at = None;
        }
        self.state.consecutive_failures = 0;
        self.state.window_started_at = None;
        self.probe_started_at = None;
    }

    /// A dependency-wide failure was observed.
    pub fn record_failure(&mut self, config: &BreakerConfig, message: &str, now: DateTime<Utc>) {
        self.state.last_error = Some(message.to_string());
        match self.state.state {
            CircuitState::Closed => {
                let window_open = self
                    .state
                    .window_started_at
                    .is_some_and(|started| now - started < config.window());
                if window_open {
                    self.state.consecutive_failures += 1;
                } else {
                    self.state.consecutive_failures = 1;
                    self.state.window_started_at = Some(now);
                }
                if self.state.consecutive_failures >= config.failure_threshold {
                    self.trip(now);
                }
            }
            CircuitState::HalfOpen => {
                self.state.consecutive_failures += 1;
                self.trip(now);
            }
            CircuitState::Open => {
                // Late result of a call admitted before the breaker opened.
                self.state.consecutive_failures += 1;
            }
        }
    }

    /// Skip the remaining cooldown: the next acquire is admitted as a probe.
    /// Returns `false` if the breaker is closed or a probe is already in
    /// flight, which is left to finish.
    pub fn force_probe(&mut self, now: DateTime<Utc>) -> bool {
        match self.state.state {
            CircuitState::Open => {
                self.move_to(CircuitState::HalfOpen, now);
                self.probe_started_at = None;
                true
            }
            CircuitState::HalfOpen => self.probe_started_at.is_none(),
            CircuitState::Closed => false,
        }
    }

    /// Whether a half-open probe has been admitted and not yet reported.
    pub fn probe_in_flight(&self) -> bool {
        self.probe_started_at.is_some()
    }

    fn trip(&mut self, now: DateTime<Utc>) {
        self.move_to(CircuitState::Open, now);
        self.state.opened_at = Some(now);
        self.probe_started_at = None;
    }

    fn move_to(&mut self, next: CircuitState, now: DateTime<Utc>) {
        self.state.state = next;
        self.state.last_transition_at = now;
    }

    fn open_error(&self, retry_after: DateTime<Utc>) -> CircuitOpenError {
        CircuitOpenError {
            dependency: self.state.dependency.clone(),
            retry_after,
        }
    }
}

// ---------------------------------------------------------------------------
// CircuitBreakerRegistry
// ---------------------------------------------------------------------------

/// One breaker per external dependency, shared by every worker.
///
/// Each dependency's breaker is mutated under its own map entry, so workers
/// calling different dependencies never contend. Persistence happens after
/// the entry is released.
pub struct CircuitBreakerRegistry<S: BreakerRepository> {
    breakers: DashMap<String, CircuitBreaker>,
    config: BreakerConfig,
    store: S,
    clock: Arc<dyn Clock>,
    bus: EventBus,
}

impl<S: BreakerRepository> CircuitBreakerRegistry<S> {
    pub fn new(store: S, config: BreakerConfig, clock: Arc<dyn Clock>, bus: EventBus) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
            store,
            clock,
            bus,
        }
    }

    /// Restore persisted breaker states. Returns how many were loaded.
    pub async fn load(&self) -> Result<usize, RepositoryError> {
        let states = self.store.list_breakers().await?;
        let count = states.len();
        for state in states {
            self.breakers
                .insert(state.dependency.clone(), CircuitBreaker::from_state(state));
        }
        tracing::debug!(count, "loaded circuit breakers");
        Ok(count)
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Admit a call to `dependency` or fail fast with `CircuitOpenError`.
    pub async fn acquire(&self, dependency: &str) -> Result<Admission, CircuitOpenError> {
        let now = self.clock.now();
        let config = self.config.clone();
        let (admission, change) = self.update(dependency, |breaker| breaker.try_acquire(&config, now));
        self.persist(change).await;
        if let Err(ref err) = admission {
            tracing::debug!(dependency, retry_after = %err.retry_after, "circuit open, call short-circuited");
        }
        admission
    }

    pub async fn record_success(&self, dependency: &str) {
        let now = self.clock.now();
        let ((), change) = self.update(dependency, |breaker| breaker.record_success(now));
        self.persist(change).await;
    }

    /// Record the outcome of a failed call. Only dependency-wide kinds count
    /// toward the threshold; any other failure proves the dependency answered.
    pub async fn record_failure(&self, dependency: &str, kind: ErrorKind, message: &str) {
        if !kind.trips_breaker() {
            self.record_success(dependency).await;
            return;
        }
        let now = self.clock.now();
        let config = self.config.clone();
        let ((), change) = self.update(dependency, |breaker| {
            breaker.record_failure(&config, message, now)
        });
        self.persist(change).await;
    }

    /// Let the next call to an open dependency through as a probe.
    pub async fn force_probe(&self, dependency: &str) -> bool {
        if !self.breakers.contains_key(dependency) {
            return false;
        }
        let now = self.clock.now();
        let (forced, change) = self.update(dependency, |breaker| breaker.force_probe(now));
        self.persist(change).await;
        if forced {
            tracing::info!(dependency, "forced circuit probe");
        }
        forced
    }

    /// Current state of every known breaker, sorted by dependency.
    pub fn snapshot(&self) -> Vec<CircuitBreakerState> {
        let mut states: Vec<CircuitBreakerState> = self
            .breakers
            .iter()
            .map(|entry| entry.value().state().clone())
            .collect();
        states.sort_by(|a, b| a.dependency.cmp(&b.dependency));
        states
    }

    /// Dependencies whose breaker is not closed.
    pub fn unavailable_dependencies(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter(|s| s.state != CircuitState::Closed)
            .map(|s| s.dependency)
            .collect()
    }

    pub fn state_of(&self, dependency: &str) -> Option<CircuitBreakerState> {
        self.breakers
            .get(dependency)
            .map(|entry| entry.value().state().clone())
    }

    /// Run `f` on the dependency's breaker under its map entry, returning the
    /// new state when it changed.
    fn update<R>(
        &self,
        dependency: &str,
        f: impl FnOnce(&mut CircuitBreaker) -> R,
    ) -> (R, Option<(CircuitBreakerState, CircuitBreakerState)>) {
        let now = self.clock.now();
        let mut entry = self
            .breakers
            .entry(dependency.to_string())
            .or_insert_with(|| CircuitBreaker::new(dependency, now));
        let before = entry.state().clone();
        let result = f(entry.value_mut());
        let after = entry.state().clone();
        let change = (before != after).then_some((before, after));
        (result, change)
    }

    async fn persist(&self, change: Option<(CircuitBreakerState, CircuitBreakerState)>) {
        let Some((before, after)) = change else {
            return;
        };
        if let Err(e) = self.store.save_breaker(&after).await {
            tracing::warn!(dependency = %after.dependency, error = %e, "failed to persist breaker state");
        }
        if before.state != after.state {
            tracing::info!(
                dependency = %after.dependency,
                from = %before.state,
                to = %after.state,
                failures = after.consecutive_failures,
                "circuit breaker transition"
            );
            self.bus.publish(OrchestratorEvent::BreakerTransitioned {
                dependency: after.dependency.clone(),
                from: before.state,
                to: after.state,
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::test_support::MemoryStore;

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    fn registry(clock: Arc<ManualClock>) -> (CircuitBreakerRegistry<MemoryStore>, MemoryStore) {
        let store = MemoryStore::default();
        let registry = CircuitBreakerRegistry::new(
            store.clone(),
            BreakerConfig::default(),
            clock,
            EventBus::new(64),
        );
        (registry, store)
    }

    #[test]
    fn closed_breaker_opens_at_threshold() {
        let config = BreakerConfig::default();
        let now = Utc::now();
        let mut breaker = CircuitBreaker::new("email", now);
        for i in 0..4 {
            breaker.record_failure(&config, "refused", now + secs(i));
            assert_eq!(breaker.state().state, CircuitState::Closed);
        }
        breaker.record_failure(&config, "refused", now + secs(4));
        assert_eq!(breaker.state().state, CircuitState::Open);
        assert_eq!(breaker.state().consecutive_failures, 5);
    }

    #[test]
    fn failures_outside_window_do_not_accumulate() {
        let config = BreakerConfig::default();
        let now = Utc::now();
        let mut breaker = CircuitBreaker::new("email", now);
        for i in 0..4 {
            breaker.record_failure(&config, "refused", now + secs(i));
        }
        // Window started at `now`; 60s later a new window begins.
        breaker.record_failure(&config, "refused", now + secs(60));
        assert_eq!(breaker.state().state, CircuitState::Closed);
        assert_eq!(breaker.state().consecutive_failures, 1);
    }

    #[test]
    fn success_resets_count() {
        let config = BreakerConfig::default();
        let now = Utc::now();
        let mut breaker = CircuitBreaker::new("email", now);
        breaker.record_failure(&config, "refused", now);
        breaker.record_failure(&config, "refused", now);
        breaker.record_success(now);
        assert_eq!(breaker.state().consecutive_failures, 0);
        assert!(breaker.state().window_started_at.is_none());
    }

    #[test]
    fn half_open_failure_restarts_cooldown() {
        let config = BreakerConfig::default();
        let now = Utc::now();
        let mut breaker = CircuitBreaker::new("email", now);
        for _ in 0..5 {
            breaker.record_failure(&config, "refused", now);
        }
        assert_eq!(
            breaker.try_acquire(&config, now + secs(30)),
            Ok(Admission::Probe)
        );
        breaker.record_failure(&config, "still down", now + secs(31));
        assert_eq!(breaker.state().state, CircuitState::Open);

        let err = breaker.try_acquire(&config, now + secs(40)).unwrap_err();
        assert_eq!(err.retry_after, now + secs(61));
    }

    #[test]
    fn forced_recovery_skips_cooldown() {
        let config = BreakerConfig::default();
        let now = Utc::now();
        let mut breaker = CircuitBreaker::new("email", now);
        for _ in 0..5 {
            breaker.record_failure(&config, "refused", now);
        }
        assert!(breaker.force_probe(now + secs(1)));
        assert_eq!(breaker.try_acquire(&config, now + secs(1)), Ok(Admission::Probe));
        assert!(!CircuitBreaker::new("x", now).force_probe(now));
    }

    #[test]
    fn slow_trial_call_keeps_other_callers_out() {
        let config = BreakerConfig::default();
        let now = Utc::now();
        let mut breaker = CircuitBreaker::new("email", now);
        for _ in 0..5 {
            breaker.record_failure(&config, "refused", now);
        }
        assert_eq!(breaker.try_acquire(&config, now + secs(30)), Ok(Admission::Probe));

        // Past another cooldown the first probe is still running.
        let err = breaker.try_acquire(&config, now + secs(61)).unwrap_err();
        assert_eq!(err.retry_after, now + secs(91));

        // Forcing a probe leaves the running one alone.
        assert!(!breaker.force_probe(now + secs(62)));
        assert!(breaker.probe_in_flight());
        assert!(breaker.try_acquire(&config, now + secs(62)).is_err());

        // The probe's own outcome decides.
        breaker.record_success(now + secs(100));
        assert_eq!(breaker.state().state, CircuitState::Closed);
        assert_eq!(breaker.try_acquire(&config, now + secs(101)), Ok(Admission::Pass));
    }

    #[test]
    fn abandoned_trial_call_is_replaced_after_timeout() {
        let config = BreakerConfig::default();
        let now = Utc::now();
        let mut breaker = CircuitBreaker::new("email", now);
        for _ in 0..5 {
            breaker.record_failure(&config, "refused", now);
        }
        assert_eq!(breaker.try_acquire(&config, now + secs(30)), Ok(Admission::Probe));
        assert!(breaker.try_acquire(&config, now + secs(329)).is_err());
        assert_eq!(breaker.try_acquire(&config, now + secs(330)), Ok(Admission::Probe));
    }

    #[tokio::test]
    async fn registry_full_cycle() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let (registry, store) = registry(clock.clone());
        let mut events = registry.bus.subscribe();

        // Five failures within the 60s window open the breaker.
        for _ in 0..5 {
            assert_eq!(registry.acquire("email").await, Ok(Admission::Pass));
            registry
                .record_failure("email", ErrorKind::Connection, "connection refused")
                .await;
            clock.advance(secs(5));
        }
        assert_eq!(
            registry.state_of("email").unwrap().state,
            CircuitState::Open
        );

        // Within the cooldown every call fails fast.
        for _ in 0..3 {
            let err = registry.acquire("email").await.unwrap_err();
            assert_eq!(err.dependency, "email");
        }

        // After the cooldown exactly one probe is admitted.
        clock.advance(secs(30));
        assert_eq!(registry.acquire("email").await, Ok(Admission::Probe));
        assert!(registry.acquire("email").await.is_err());

        // Probe success closes the breaker with a zero count.
        registry.record_success("email").await;
        let state = registry.state_of("email").unwrap();
        assert_eq!(state.state, CircuitState::Closed);
        assert_eq!(state.consecutive_failures, 0);

        let persisted = store.breakers();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].state, CircuitState::Closed);

        let mut transitions = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let OrchestratorEvent::BreakerTransitioned { to, .. } = event {
                transitions.push(to);
            }
        }
        assert_eq!(
            transitions,
            vec![CircuitState::Open, CircuitState::HalfOpen, CircuitState::Closed]
        );
    }

    #[tokio::test]
    async fn non_tripping_failures_do_not_count() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (registry, _store) = registry(clock);
        for _ in 0..10 {
            registry
                .record_failure("ledger", ErrorKind::DataIntegrity, "checksum mismatch")
                .await;
        }
        let state = registry.state_of("ledger").unwrap();
        assert_eq!(state.state, CircuitState::Closed);
        assert_eq!(state.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn load_restores_persisted_state() {
        let now = Utc::now();
        let clock = Arc::new(ManualClock::new(now));
        let (registry, store) = registry(clock.clone());
        let mut open = CircuitBreakerState::closed("social", now);
        open.state = CircuitState::Open;
        open.opened_at = Some(now);
        store.save_breaker(&open).await.unwrap();

        assert_eq!(registry.load().await.unwrap(), 1);
        assert!(registry.acquire("social").await.is_err());
        assert_eq!(registry.unavailable_dependencies(), vec!["social".to_string()]);
        assert!(registry.force_probe("social").await);
        assert_eq!(registry.acquire("social").await, Ok(Admission::Probe));

        // A second forced probe while the first is out admits nobody new.
        clock.advance(secs(31));
        assert!(!registry.force_probe("social").await);
        assert!(registry.acquire("social").await.is_err());
    }
}
