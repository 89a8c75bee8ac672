//! Connectors that run in-process.
//!
//! `FileIngestConnector` reads a dropped file from the local filesystem.
//! `DryRunConnector` is the catch-all for actions with no configured
//! endpoint: it records what would have happened and succeeds.

use std::path::PathBuf;

use serde_json::{Value, json};
use steward_core::execution::connector::{Connector, ConnectorError, StepCall};
use steward_types::failure::ErrorKind;
use steward_types::task::TaskPayload;

// ---------------------------------------------------------------------------
// FileIngestConnector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct FileIngestConnector;

impl FileIngestConnector {
    pub fn new() -> Self {
        Self
    }

    /// Step input wins over the payload so a plan can redirect the read.
    fn path_of(call: &StepCall) -> Option<PathBuf> {
        if let Some(path) = call.step.input.get("path").and_then(Value::as_str) {
            return Some(PathBuf::from(path));
        }
        match &call.payload {
            TaskPayload::FileDrop { path } => Some(PathBuf::from(path)),
            _ => None,
        }
    }
}

impl Connector for FileIngestConnector {
    fn name(&self) -> &str {
        "file_ingest"
    }

    async fn invoke(&self, call: &StepCall) -> Result<Value, ConnectorError> {
        let path = Self::path_of(call).ok_or_else(|| {
            ConnectorError::new("no path to ingest").with_kind(ErrorKind::DataIntegrity)
        })?;

        let content = tokio::fs::read(&path).await.map_err(|e| {
            let error = ConnectorError::new(format!("{}: {e}", path.display()));
            match e.kind() {
                std::io::ErrorKind::NotFound => error.with_kind(ErrorKind::DataIntegrity),
                std::io::ErrorKind::PermissionDenied => error.with_kind(ErrorKind::Permission),
                _ => error,
            }
        })?;

        let lines = content.iter().filter(|b| **b == b'\n').count();
        tracing::debug!(task_id = %call.task_id, path = %path.display(), bytes = content.len(), "file ingested");
        Ok(json!({
            "path": path.display().to_string(),
            "bytes": content.len(),
            "lines": lines,
        }))
    }
}

// ---------------------------------------------------------------------------
// DryRunConnector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct DryRunConnector;

impl DryRunConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for DryRunConnector {
    fn name(&self) -> &str {
        "dry_run"
    }

    async fn invoke(&self, call: &StepCall) -> Result<Value, ConnectorError> {
        tracing::info!(
            task_id = %call.task_id,
            step = %call.step.name,
            action = %call.step.action,
            "no connector configured, step completed as dry run"
        );
        Ok(json!({
            "dry_run": true,
            "step": call.step.name,
            "action": call.step.action,
        }))
    }
}
