//! HTTP webhook connector.
//!
//! POSTs the step call as JSON to a configured endpoint. The idempotency key
//! travels in the `Idempotency-Key` header so the remote side can drop
//! duplicate deliveries of a retried step. Non-2xx responses become
//! `ConnectorError`s carrying the status code for classification.

use std::time::Duration;

use serde_json::{Value, json};
use steward_core::execution::connector::{Connector, ConnectorError, StepCall};
use steward_types::config::WebhookConfig;
use steward_types::failure::ErrorKind;
use tokio::sync::RwLock;

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Longest response body echoed into an error message.
const MAX_ERROR_BODY: usize = 512;

pub struct WebhookConnector {
    name: String,
    url: String,
    token_env: Option<String>,
    token: RwLock<Option<String>>,
    client: reqwest::Client,
}

impl WebhookConnector {
    /// Build a connector for `action`. The bearer token, if any, is read
    /// from `token_env` now and again on every credential refresh.
    pub fn new(action: &str, config: &WebhookConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("steward/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            name: format!("webhook:{action}"),
            url: config.url.clone(),
            token: RwLock::new(read_token(config.token_env.as_deref())),
            token_env: config.token_env.clone(),
            client,
        })
    }

    fn body(call: &StepCall) -> Value {
        json!({
            "task_id": call.task_id,
            "step_index": call.step_index,
            "step": call.step.name,
            "action": call.step.action,
            "input": call.step.input,
            "payload": call.payload,
            "prior_state": call.prior_state,
        })
    }
}

fn read_token(var: Option<&str>) -> Option<String> {
    var.and_then(|name| std::env::var(name).ok())
        .filter(|token| !token.trim().is_empty())
}

fn transport_error(err: reqwest::Error) -> ConnectorError {
    let error = ConnectorError::new(err.to_string());
    if err.is_timeout() {
        error.with_kind(ErrorKind::Timeout)
    } else if err.is_connect() {
        error.with_kind(ErrorKind::Connection)
    } else {
        error
    }
}

impl Connector for WebhookConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, call: &StepCall) -> Result<Value, ConnectorError> {
        let mut request = self
            .client
            .post(&self.url)
            .header(IDEMPOTENCY_HEADER, &call.idempotency_key)
            .json(&Self::body(call));
        if let Some(token) = self.token.read().await.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;

        tracing::debug!(
            connector = %self.name,
            task_id = %call.task_id,
            step_index = call.step_index,
            status = status.as_u16(),
            body_len = text.len(),
            "webhook call completed"
        );

        if !status.is_success() {
            let snippet: String = text.chars().take(MAX_ERROR_BODY).collect();
            return Err(ConnectorError::new(format!("{status}: {snippet}")).with_status(status.as_u16()));
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        // Plain-text bodies are kept as a string rather than rejected.
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    async fn refresh_credentials(&self) -> bool {
        let Some(token) = read_token(self.token_env.as_deref()) else {
            tracing::warn!(connector = %self.name, "no token available to refresh");
            return false;
        };
        *self.token.write().await = Some(token);
        tracing::info!(connector = %self.name, "credentials refreshed");
        true
    }
}
