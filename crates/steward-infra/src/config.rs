//! Configuration loader for Steward.
//!
//! Reads `config.toml` from the data directory (`~/.steward/` in production)
//! and deserializes it into [`StewardConfig`]. Falls back to defaults when
//! the file is missing, malformed, or fails validation.

use std::path::{Path, PathBuf};

use steward_types::config::StewardConfig;

/// File name of the SQLite database inside the data directory.
pub const DATABASE_FILE: &str = "steward.db";

/// File name of the configuration inside the data directory.
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Parse and validate a configuration document.
pub fn parse_config(content: &str) -> Result<StewardConfig, ConfigError> {
    let config: StewardConfig = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &StewardConfig) -> Result<(), ConfigError> {
    if config.retry.max_attempts == 0 {
        return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
    }
    if !(0.0..=1.0).contains(&config.retry.jitter_ratio) {
        return Err(ConfigError::Invalid("retry.jitter_ratio must be within 0..=1".into()));
    }
    if config.breaker.failure_threshold == 0 {
        return Err(ConfigError::Invalid(
            "breaker.failure_threshold must be at least 1".into(),
        ));
    }
    if config.breaker.probe_timeout_secs < config.workers.step_timeout_secs {
        return Err(ConfigError::Invalid(
            "breaker.probe_timeout_secs must be at least workers.step_timeout_secs".into(),
        ));
    }
    if config.workers.count == 0 {
        return Err(ConfigError::Invalid("workers.count must be at least 1".into()));
    }
    if config.health.critical_failure_rate < config.health.degraded_failure_rate {
        return Err(ConfigError::Invalid(
            "health.critical_failure_rate is below degraded_failure_rate".into(),
        ));
    }
    if config.health.critical_queue_depth < config.health.degraded_queue_depth {
        return Err(ConfigError::Invalid(
            "health.critical_queue_depth is below degraded_queue_depth".into(),
        ));
    }
    for (action, hook) in &config.connectors {
        if !(hook.url.starts_with("http://") || hook.url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "connector '{action}' url must be http(s): {}",
                hook.url
            )));
        }
    }
    Ok(())
}

/// Load configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`StewardConfig::default()`].
/// - If the file fails to parse or validate, logs a warning and returns the default.
pub async fn load_config(data_dir: &Path) -> StewardConfig {
    let config_path = data_dir.join(CONFIG_FILE);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return StewardConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return StewardConfig::default();
        }
    };

    match parse_config(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("{}: {err}, using defaults", config_path.display());
            StewardConfig::default()
        }
    }
}

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `STEWARD_DATA_DIR` environment variable
/// 2. `~/.steward`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("STEWARD_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".steward");
    }

    PathBuf::from(".steward")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(tmp.path()).await;
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.connectors.is_empty());
    }

    #[tokio::test]
    async fn load_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join(CONFIG_FILE),
            r#"
[workers]
count = 8

[connectors."email.send"]
url = "https://hooks.example.com/email"
token_env = "EMAIL_HOOK_TOKEN"
"#,
        )
        .await
        .unwrap();

        let config = load_config(tmp.path()).await;
        assert_eq!(config.workers.count, 8);
        assert_eq!(config.workers.lease_ttl_secs, 300);
        assert_eq!(
            config.connectors["email.send"].token_env.as_deref(),
            Some("EMAIL_HOOK_TOKEN")
        );
    }

    #[tokio::test]
    async fn load_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join(CONFIG_FILE), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_config(tmp.path()).await;
        assert_eq!(config.workers.count, 4);
    }

    #[test]
    fn parse_config_rejects_inconsistent_values() {
        let err = parse_config("[workers]\ncount = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = parse_config("[health]\ncritical_failure_rate = 0.1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = parse_config("[connectors.\"x\"]\nurl = \"ftp://nope\"\n").unwrap_err();
        assert!(err.to_string().contains("ftp://nope"));

        let err = parse_config("[breaker]\nprobe_timeout_secs = 60\n").unwrap_err();
        assert!(err.to_string().contains("probe_timeout_secs"));

        assert!(matches!(parse_config("[retry"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_resolve_data_dir_from_env() {
        // SAFETY: This test is single-threaded and restores the env var immediately.
        unsafe {
            std::env::set_var("STEWARD_DATA_DIR", "/tmp/test-steward");
        }
        let dir = resolve_data_dir();
        assert_eq!(dir, PathBuf::from("/tmp/test-steward"));
        unsafe {
            std::env::remove_var("STEWARD_DATA_DIR");
        }
    }
}
