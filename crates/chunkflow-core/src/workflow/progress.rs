//! Progress derivation from persisted child records.
//!
//! The tracker never mutates state. It re-reads every chunk's child record in
//! plan order and classifies it, so its answer is always consistent with what
//! is durably stored regardless of which process did the work.

use chunkflow_types::session::ChunkPlan;
use chunkflow_types::step::{ChunkSummary, ProgressSnapshot};
use serde_json::Value;

use crate::storage::records::{RecordError, SessionRecords};
use crate::storage::session_store::SessionStore;

/// Pending/completed classification plus the ordered completed payloads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progress {
    /// Chunk ids still to process, in plan order.
    pub pending: Vec<String>,
    /// Chunk ids whose sub-queue is drained, in plan order.
    pub completed: Vec<String>,
    /// Completed chunks' payloads, in plan order (not completion order).
    pub ordered_summaries: Vec<ChunkSummary>,
}

impl Progress {
    pub fn is_done(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            pending: self.pending.clone(),
            completed: self.completed.clone(),
        }
    }
}

/// Reads child records to derive session progress.
pub struct ProgressTracker<S: SessionStore> {
    records: SessionRecords<S>,
}

impl<S: SessionStore> Clone for ProgressTracker<S> {
    fn clone(&self) -> Self {
        Self {
            records: self.records.clone(),
        }
    }
}

impl<S: SessionStore> ProgressTracker<S> {
    pub fn new(records: SessionRecords<S>) -> Self {
        Self { records }
    }

    /// Classify every chunk of `plan` for `session_id`.
    ///
    /// A chunk is completed iff its child record exists and reports an empty
    /// sub-queue. A missing record means the chunk never ran and is pending.
    pub async fn progress(
        &self,
        session_id: &str,
        plan: &ChunkPlan,
    ) -> Result<Progress, RecordError> {
        let mut progress = Progress::default();

        for chunk in plan.chunks() {
            match self.records.load_child(session_id, &chunk.chunk_id).await? {
                Some(child) if child.is_complete() => {
                    progress.completed.push(chunk.chunk_id.clone());
                    progress.ordered_summaries.push(ChunkSummary {
                        chunk_id: chunk.chunk_id.clone(),
                        name: chunk.name.clone(),
                        index: chunk.index,
                        result: child.result.unwrap_or(Value::Null),
                    });
                }
                _ => progress.pending.push(chunk.chunk_id.clone()),
            }
        }

        tracing::trace!(
            session_id,
            pending = progress.pending.len(),
            completed = progress.completed.len(),
            "computed progress"
        );

        Ok(progress)
    }
}
