//! Engine error taxonomy.
//!
//! Validation and not-found errors are surfaced verbatim to the caller.
//! Timeouts and per-chunk failures are captured at the smallest scope by the
//! executor and only reach this type when a whole operation (a cache fill, a
//! synthesize call) is affected.

use std::time::Duration;

use chunkflow_types::error::{RepositoryError, WorkflowError};
use chunkflow_types::protocol::{ErrorKind, ALLOWED_ACTIONS};
use chunkflow_types::step::ChunkRunResult;

use crate::storage::records::RecordError;

/// Caller mistakes. Never retried automatically; always names the offending
/// value(s) and, where one exists, the valid range.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("unknown action '{action}'; expected one of: {}", ALLOWED_ACTIONS)]
    UnknownAction { action: String },

    #[error("session_id is required for '{action}'")]
    MissingSessionId { action: String },

    #[error("batch_index is required for 'batch'")]
    MissingBatchIndex,

    #[error("unknown chunk id(s): {}", ids.join(", "))]
    UnknownChunkIds { ids: Vec<String> },

    #[error("{}", batch_range_message(*index, *batch_count))]
    BatchIndexOutOfRange { index: i64, batch_count: usize },

    #[error("batch_size must be at least 1")]
    InvalidBatchSize,

    #[error("session '{session_id}' declares no document ordering")]
    NoDocumentOrdering { session_id: String },

    #[error("duplicate chunk id(s) in plan: {}", ids.join(", "))]
    DuplicateChunkIds { ids: Vec<String> },

    #[error("session '{session_id}' belongs to workflow '{actual}', not '{expected}'")]
    WorkflowMismatch {
        session_id: String,
        expected: String,
        actual: String,
    },
}

fn batch_range_message(index: i64, batch_count: usize) -> String {
    if batch_count == 0 {
        format!("batch_index {index} is out of range: no batches available")
    } else {
        format!("batch_index must be 0..{}", batch_count - 1)
    }
}

/// Errors that can occur while driving a workflow.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Returned, not raised: the session was never started (or was purged).
    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },

    /// A fetch or step exceeded its deadline.
    #[error("{operation} timed out after {}ms", after.as_millis())]
    Timeout { operation: String, after: Duration },

    /// Synthesize attempted while chunks are still outstanding.
    #[error("synthesize blocked: {} chunk(s) still pending: {}", pending.len(), pending.join(", "))]
    PendingBlock { pending: Vec<String> },

    /// An auto-complete shard round finished without completing any chunk.
    #[error("auto-complete stalled with {} chunk(s) pending: {}", pending.len(), pending.join(", "))]
    Stalled {
        pending: Vec<String>,
        failures: Vec<ChunkRunResult>,
    },

    #[error("run cancelled")]
    Cancelled,

    #[error("workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Record(#[from] RecordError),
}

impl From<RepositoryError> for EngineError {
    fn from(e: RepositoryError) -> Self {
        EngineError::Record(RecordError::Repository(e))
    }
}

impl EngineError {
    /// Machine-readable category used in error envelopes.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::SessionNotFound { .. } => ErrorKind::NotFound,
            EngineError::Timeout { .. } => ErrorKind::Timeout,
            EngineError::PendingBlock { .. } => ErrorKind::PendingBlock,
            EngineError::Stalled { .. } => ErrorKind::Stalled,
            EngineError::Cancelled => ErrorKind::Cancelled,
            EngineError::Workflow(WorkflowError::InvalidInput(_))
            | EngineError::Workflow(WorkflowError::Unsupported(_)) => ErrorKind::Validation,
            EngineError::Workflow(_) => ErrorKind::Workflow,
            EngineError::Record(_) => ErrorKind::Internal,
        }
    }
}
