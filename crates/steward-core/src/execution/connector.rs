//! Connector port: adapters that execute one plan step against an external
//! system.
//!
//! `Connector` uses RPITIT, so it cannot be a trait object directly. The
//! object-safe `ConnectorDyn` is blanket-implemented for every `Connector`,
//! and `BoxConnector` wraps it so a registry can hold connectors of
//! different concrete types.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use steward_types::task::{PlanStep, TaskPayload};
use uuid::Uuid;

pub use crate::recovery::classifier::ConnectorError;

// ---------------------------------------------------------------------------
// StepCall
// ---------------------------------------------------------------------------

/// Everything a connector receives for one step invocation.
#[derive(Debug, Clone)]
pub struct StepCall {
    pub task_id: Uuid,
    pub step_index: u32,
    pub step: PlanStep,
    pub payload: TaskPayload,
    /// Output of the previous committed step, `Null` for the first step.
    pub prior_state: Value,
    /// Stable across retries of the same step; connectors with external
    /// side effects should pass it to the remote system.
    pub idempotency_key: String,
}

impl StepCall {
    pub fn idempotency_key_for(task_id: Uuid, step_index: u32) -> String {
        format!("{task_id}-{step_index}")
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

pub trait Connector: Send + Sync {
    fn name(&self) -> &str;

    /// Execute the step, returning its output state or a raw error for
    /// classification.
    fn invoke(
        &self,
        call: &StepCall,
    ) -> impl Future<Output = Result<Value, ConnectorError>> + Send;

    /// Try to refresh credentials after an authentication failure. Returns
    /// `true` if fresh credentials are in place and the call may be retried.
    fn refresh_credentials(&self) -> impl Future<Output = bool> + Send {
        async { false }
    }
}

/// Object-safe version of [`Connector`] with boxed futures.
pub trait ConnectorDyn: Send + Sync {
    fn name(&self) -> &str;

    fn invoke_boxed<'a>(
        &'a self,
        call: &'a StepCall,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ConnectorError>> + Send + 'a>>;

    fn refresh_credentials_boxed(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;
}

impl<T: Connector> ConnectorDyn for T {
    fn name(&self) -> &str {
        Connector::name(self)
    }

    fn invoke_boxed<'a>(
        &'a self,
        call: &'a StepCall,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ConnectorError>> + Send + 'a>> {
        Box::pin(self.invoke(call))
    }

    fn refresh_credentials_boxed(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(self.refresh_credentials())
    }
}

/// Type-erased connector.
#[derive(Clone)]
pub struct BoxConnector {
    inner: Arc<dyn ConnectorDyn>,
}

impl BoxConnector {
    pub fn new<T: Connector + 'static>(connector: T) -> Self {
        Self {
            inner: Arc::new(connector),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn invoke(&self, call: &StepCall) -> Result<Value, ConnectorError> {
        self.inner.invoke_boxed(call).await
    }

    pub async fn refresh_credentials(&self) -> bool {
        self.inner.refresh_credentials_boxed().await
    }
}

impl std::fmt::Debug for BoxConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxConnector")
            .field("name", &self.name())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ConnectorRegistry
// ---------------------------------------------------------------------------

/// Connectors keyed by plan action, with an optional catch-all.
#[derive(Debug, Clone, Default)]
pub struct ConnectorRegistry {
    by_action: HashMap<String, BoxConnector>,
    fallback: Option<BoxConnector>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Connector + 'static>(&mut self, action: impl Into<String>, connector: T) {
        self.by_action.insert(action.into(), BoxConnector::new(connector));
    }

    pub fn register_boxed(&mut self, action: impl Into<String>, connector: BoxConnector) {
        self.by_action.insert(action.into(), connector);
    }

    /// Connector used for actions with no explicit registration.
    pub fn set_fallback<T: Connector + 'static>(&mut self, connector: T) {
        self.fallback = Some(BoxConnector::new(connector));
    }

    pub fn resolve(&self, action: &str) -> Option<&BoxConnector> {
        self.by_action.get(action).or(self.fallback.as_ref())
    }

    pub fn actions(&self) -> Vec<&str> {
        let mut actions: Vec<&str> = self.by_action.keys().map(String::as_str).collect();
        actions.sort_unstable();
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    impl Connector for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn invoke(&self, call: &StepCall) -> Result<Value, ConnectorError> {
            Ok(json!({"step": call.step.name, "prior": call.prior_state}))
        }
    }

    struct Refreshing;

    impl Connector for Refreshing {
        fn name(&self) -> &str {
            "refreshing"
        }

        async fn invoke(&self, _call: &StepCall) -> Result<Value, ConnectorError> {
            Err(ConnectorError::new("unauthorized").with_status(401))
        }

        async fn refresh_credentials(&self) -> bool {
            true
        }
    }

    fn call() -> StepCall {
        let task_id = Uuid::now_v7();
        StepCall {
            task_id,
            step_index: 0,
            step: PlanStep::new("compose", "email.compose", "local"),
            payload: TaskPayload::FileDrop {
                path: "inbox/a.md".to_string(),
            },
            prior_state: json!({"draft": 1}),
            idempotency_key: StepCall::idempotency_key_for(task_id, 0),
        }
    }

    #[tokio::test]
    async fn registry_resolves_by_action_then_fallback() {
        let mut registry = ConnectorRegistry::new();
        registry.register("email.compose", Echo);
        assert!(registry.resolve("email.send").is_none());

        registry.set_fallback(Refreshing);
        assert_eq!(registry.resolve("email.compose").unwrap().name(), "echo");
        assert_eq!(registry.resolve("email.send").unwrap().name(), "refreshing");
        assert_eq!(registry.actions(), vec!["email.compose"]);
    }

    #[tokio::test]
    async fn boxed_connector_delegates() {
        let echo = BoxConnector::new(Echo);
        let out = echo.invoke(&call()).await.unwrap();
        assert_eq!(out["step"], "compose");
        assert_eq!(out["prior"]["draft"], 1);
        assert!(!echo.refresh_credentials().await);

        let refreshing = BoxConnector::new(Refreshing);
        assert!(refreshing.invoke(&call()).await.is_err());
        assert!(refreshing.refresh_credentials().await);
    }
}
