//! Per-workflow callback strategy.
//!
//! Each workflow type implements [`ChunkedWorkflow`] once: `start` proposes
//! the chunk plan, `step` advances one chunk's sub-queue, `synthesize` merges
//! the ordered chunk summaries into the final artifact, and `fetch_rows`
//! optionally backs the lazily paginated batch cache.

use chunkflow_types::error::WorkflowError;
use chunkflow_types::session::{
    ChunkChildState, ChunkDescriptor, ChunkSeed, DocumentOrdering, WorkflowSession,
};
use chunkflow_types::step::ChunkSummary;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// Input to a workflow's start callback.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartRequest {
    /// Workflow-specific input (document text, query, source id, ...).
    pub params: Value,
    /// Requested page size; `None` falls back to the engine default.
    pub batch_size: Option<usize>,
    /// Requested row cap; `None` falls back to what the workflow declares.
    pub max_items: Option<usize>,
}

impl StartRequest {
    pub fn new(params: Value) -> Self {
        Self {
            params,
            ..Default::default()
        }
    }
}

/// What a workflow's start callback produces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartPlan {
    /// Chunks in plan order. Ids must be unique.
    pub chunks: Vec<ChunkSeed>,
    /// Rows shown to the caller right after start.
    pub preview: Vec<Value>,
    /// Declared total rows the batch cache will hold (0 = unknown/no cap).
    pub max_items: usize,
    /// Set for full-document result sets that need dedupe and stable order.
    pub ordering: Option<DocumentOrdering>,
    /// Workflow metadata persisted on the session.
    pub extensions: Map<String, Value>,
}

/// Strategy implemented once per workflow type.
///
/// Uses RPITIT (return-position `impl Trait` in traits) for async methods.
/// Implementations must be cheap to share: the engine holds one instance in
/// an `Arc` and calls `step` from many tasks at once.
pub trait ChunkedWorkflow: Send + Sync + 'static {
    /// The final artifact produced by `synthesize`.
    type Output: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    /// Tag stored on every session created by this workflow.
    fn workflow_type(&self) -> &str;

    /// Build the chunk plan for a new session.
    fn start(
        &self,
        request: &StartRequest,
    ) -> impl std::future::Future<Output = Result<StartPlan, WorkflowError>> + Send;

    /// Advance one chunk.
    ///
    /// Receives the chunk's current state and returns the next one. Each call
    /// must shrink `remaining`; the executor keeps calling until the queue is
    /// empty. Set `result` on the returned state to hand a payload to
    /// `synthesize`.
    fn step(
        &self,
        chunk: &ChunkDescriptor,
        state: ChunkChildState,
    ) -> impl std::future::Future<Output = Result<ChunkChildState, WorkflowError>> + Send;

    /// Merge completed chunk summaries, supplied in plan order.
    fn synthesize(
        &self,
        summaries: Vec<ChunkSummary>,
    ) -> impl std::future::Future<Output = Result<Self::Output, WorkflowError>> + Send;

    /// Fetch the full result set backing the batch cache.
    ///
    /// Called at most once per session unless the cache is invalidated.
    fn fetch_rows(
        &self,
        session: &WorkflowSession,
    ) -> impl std::future::Future<Output = Result<Vec<Value>, WorkflowError>> + Send {
        let _ = session;
        let workflow_type = self.workflow_type().to_string();
        async move { Err(WorkflowError::Unsupported(workflow_type)) }
    }
}

/// Run CPU-bound chunk logic on the blocking pool so it never stalls the
/// dispatch layer.
pub async fn offload_blocking<T, F>(f: F) -> Result<T, WorkflowError>
where
    F: FnOnce() -> Result<T, WorkflowError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| WorkflowError::Failed(format!("blocking task failed: {e}")))?
}
