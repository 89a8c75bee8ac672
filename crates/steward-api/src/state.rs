//! Application state wiring the orchestrator to its infrastructure.
//!
//! The orchestrator is generic over store and planner; AppState pins it to
//! the SQLite store and the rule-based planner.

use std::path::PathBuf;
use std::sync::Arc;

use steward_core::clock::SystemClock;
use steward_core::orchestrator::Orchestrator;
use steward_infra::config::{load_config, resolve_data_dir};
use steward_infra::connector::build_registry;
use steward_infra::planner::RulePlanner;
use steward_infra::sqlite::SqliteStore;
use steward_infra::sqlite::pool::database_url;
use steward_types::config::StewardConfig;

pub type ConcreteOrchestrator = Orchestrator<SqliteStore, RulePlanner>;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ConcreteOrchestrator>,
    pub config: StewardConfig,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Resolve the data directory, load config, open the database, and wire
    /// the orchestrator. `workers` overrides the configured worker count.
    pub async fn init(workers: Option<usize>) -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir).await?;

        let mut config = load_config(&data_dir).await;
        if let Some(count) = workers {
            config.workers.count = count.max(1);
        }

        let store = SqliteStore::open(&database_url(&data_dir)).await?;
        let connectors = build_registry(&config)?;
        tracing::debug!(actions = ?connectors.actions(), "connectors registered");

        let orchestrator = Orchestrator::new(
            store,
            RulePlanner::new(),
            connectors,
            config.clone(),
            Arc::new(SystemClock),
        );

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            config,
            data_dir,
        })
    }
}
