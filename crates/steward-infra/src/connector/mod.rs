//! Connector implementations and the registry built from configuration.

pub mod local;
pub mod webhook;

pub use local::{DryRunConnector, FileIngestConnector};
pub use webhook::WebhookConnector;

use steward_core::execution::connector::ConnectorRegistry;
use steward_types::config::StewardConfig;

/// Action served by the built-in file ingest connector.
pub const FILE_INGEST_ACTION: &str = "file.ingest";

/// Build the registry: one webhook per configured action, the local file
/// ingest connector unless a webhook overrides it, and a dry-run fallback.
pub fn build_registry(config: &StewardConfig) -> Result<ConnectorRegistry, reqwest::Error> {
    let mut registry = ConnectorRegistry::new();
    registry.register(FILE_INGEST_ACTION, FileIngestConnector::new());

    for (action, hook) in &config.connectors {
        let connector = WebhookConnector::new(action, hook, config.workers.step_timeout())?;
        registry.register(action.clone(), connector);
        tracing::debug!(action = %action, url = %hook.url, "webhook connector registered");
    }

    registry.set_fallback(DryRunConnector::new());
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use steward_types::config::WebhookConfig;

    #[test]
    fn configured_webhook_overrides_builtin() {
        let mut config = StewardConfig::default();
        config.connectors.insert(
            "file.ingest".to_string(),
            WebhookConfig {
                url: "https://hooks.example.com/ingest".to_string(),
                token_env: None,
            },
        );
        config.connectors.insert(
            "email.send".to_string(),
            WebhookConfig {
                url: "https://hooks.example.com/email".to_string(),
                token_env: None,
            },
        );

        let registry = build_registry(&config).unwrap();
        assert_eq!(registry.actions(), vec!["email.send", "file.ingest"]);
        assert_eq!(registry.resolve("file.ingest").unwrap().name(), "webhook:file.ingest");
        assert_eq!(registry.resolve("social.publish").unwrap().name(), "dry_run");
    }
}
