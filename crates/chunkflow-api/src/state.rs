//! Application state wiring the engine to its infrastructure.
//!
//! AppState holds the concrete engine and dispatcher used by both the CLI and
//! the REST API. The engine is generic over workflow/store traits; AppState
//! pins it to the built-in document-digest workflow and the SQLite store.

use std::path::PathBuf;
use std::sync::Arc;

use chunkflow_core::workflow::dispatcher::ActionDispatcher;
use chunkflow_core::workflow::engine::WorkflowEngine;
use chunkflow_infra::config::load_engine_config;
use chunkflow_infra::data_dir::resolve_data_dir;
use chunkflow_infra::sqlite::pool::DatabasePool;
use chunkflow_infra::sqlite::session::SqliteSessionStore;
use chunkflow_types::config::EngineConfig;

use crate::http::error::AppError;
use crate::workflows::document_digest::DocumentDigestWorkflow;

/// Concrete type aliases for the engine generics pinned to infra implementations.
pub type DigestEngine = WorkflowEngine<DocumentDigestWorkflow, SqliteSessionStore>;

pub type DigestDispatcher = ActionDispatcher<DocumentDigestWorkflow, SqliteSessionStore>;

/// Shared application state.
///
/// Used by both CLI commands and REST API handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DigestEngine>,
    pub dispatcher: DigestDispatcher,
    pub config: EngineConfig,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Initialize the application state: resolve the data dir, connect to
    /// the database, load config and wire the engine.
    pub async fn init(data_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let data_dir = data_dir.unwrap_or_else(resolve_data_dir);
        let db_pool = DatabasePool::open_in(&data_dir).await?;
        let config = load_engine_config(&data_dir).await;

        tracing::debug!(data_dir = %data_dir.display(), ?config, "application state ready");
        Ok(Self::from_parts(data_dir, db_pool, config))
    }

    /// Wire the engine over an already-open pool.
    pub fn from_parts(data_dir: PathBuf, db_pool: DatabasePool, config: EngineConfig) -> Self {
        let store = Arc::new(SqliteSessionStore::new(db_pool));
        let engine = Arc::new(WorkflowEngine::new(
            DocumentDigestWorkflow::new(),
            store,
            config,
        ));

        Self {
            dispatcher: ActionDispatcher::new(Arc::clone(&engine)),
            config: engine.config().clone(),
            engine,
            data_dir,
        }
    }

    /// Resolve the engine serving `workflow_type`.
    pub fn engine_for(&self, workflow_type: &str) -> Result<&Arc<DigestEngine>, AppError> {
        if self.engine.workflow_type() == workflow_type {
            Ok(&self.engine)
        } else {
            Err(AppError::UnknownWorkflow(workflow_type.to_string()))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::test_state;
    use crate::workflows::document_digest::WORKFLOW_TYPE;

    #[tokio::test]
    async fn test_engine_for_known_and_unknown_types() {
        let (state, _dir) = test_state().await;
        assert!(state.engine_for(WORKFLOW_TYPE).is_ok());
        assert!(state.engine_for("spreadsheet").is_err());
    }
}
