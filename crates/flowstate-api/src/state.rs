//! Application state wiring the engine to its adapters.
//!
//! AppState holds the concrete engine used by both CLI and REST API. The
//! engine is generic over its execution repository; AppState pins it to the
//! SQLite implementation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use flowstate_core::workflow::{
    discover_workflows, BoxTaskInvoker, ItemsSourceRegistry, Workflow, WorkflowEngine,
};
use flowstate_infra::config::{database_url, load_config};
use flowstate_infra::filesystem::{resolve_data_dir, DirectoryItemsSource};
use flowstate_infra::http::build_task_registry;
use flowstate_infra::secret::EnvParameterStore;
use flowstate_infra::sqlite::{DatabasePool, SqliteExecutionRepository};
use flowstate_types::config::EngineConfig;

/// Name under which the directory items source is registered.
pub const OBJECTS_SOURCE: &str = "objects";

pub type ConcreteEngine = WorkflowEngine<SqliteExecutionRepository>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: ConcreteEngine,
    /// Definitions served by name over the REST API.
    pub workflows: Arc<BTreeMap<String, Workflow>>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Load configuration, open the database and wire the adapters.
    pub async fn init(config_path: Option<&Path>) -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let config = load_config(config_path, &data_dir).await?;

        let url = database_url(&config, &data_dir);
        let pool = DatabasePool::new(&url)
            .await
            .with_context(|| format!("failed to open database {url}"))?;
        let repository = SqliteExecutionRepository::new(pool);

        let registry = build_task_registry(&config, &EnvParameterStore::new()).await?;
        let items = items_registry(&config);
        let workflows = load_workflows(&config, &data_dir)?;

        tracing::info!(
            data_dir = %data_dir.display(),
            tasks = config.tasks.len(),
            workflows = workflows.len(),
            "application state initialized"
        );

        let engine = WorkflowEngine::new(config, BoxTaskInvoker::new(registry), items, repository);
        Ok(Self {
            engine,
            workflows: Arc::new(workflows),
            data_dir,
        })
    }

    pub fn workflow(&self, name: &str) -> Option<&Workflow> {
        self.workflows.get(name)
    }
}

fn items_registry(config: &EngineConfig) -> ItemsSourceRegistry {
    let mut items = ItemsSourceRegistry::new();
    if let Some(root) = &config.items.root {
        items.register(OBJECTS_SOURCE, Arc::new(DirectoryItemsSource::new(root)));
    }
    items
}

/// Definitions under `server.workflows_dir`, or `{data_dir}/workflows`.
fn load_workflows(
    config: &EngineConfig,
    data_dir: &Path,
) -> anyhow::Result<BTreeMap<String, Workflow>> {
    let dir = config
        .server
        .workflows_dir
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| data_dir.join("workflows"));
    let found = discover_workflows(&dir)
        .with_context(|| format!("failed to scan workflows in {}", dir.display()))?;

    let mut workflows = BTreeMap::new();
    for (path, workflow) in found {
        if let Some(previous) = workflows.insert(workflow.name().to_string(), workflow) {
            tracing::warn!(?path, name = previous.name(), "duplicate workflow name, keeping the later file");
        }
    }
    Ok(workflows)
}
