//! Fan-out executor: bounded-concurrency execution of selected chunks.
//!
//! One shard call is a single "level" of parallel work. Every selected chunk
//! is spawned into a `tokio::JoinSet`, gated by a `Semaphore` sized to the
//! configured concurrency cap. Each task owns exactly one child record, so no
//! two tasks ever write the same key and no locks are needed.
//!
//! # Per-chunk flow
//!
//! 1. Load the chunk's child record (or seed a fresh one from the plan).
//! 2. Call the workflow's `step` under the step deadline.
//! 3. Persist the returned state; repeat until the sub-queue is empty.
//! 4. A step error is recorded on the child; a timeout leaves it untouched.
//!
//! Failures never abort sibling chunks; they become failed entries.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chunkflow_types::protocol::NextAction;
use chunkflow_types::session::{ChildStatus, ChunkChildState, ChunkDescriptor, WorkflowSession};
use chunkflow_types::step::ChunkRunResult;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::storage::records::SessionRecords;
use crate::storage::session_store::SessionStore;

use super::error::{EngineError, ValidationError};
use super::progress::{Progress, ProgressTracker};
use super::strategy::ChunkedWorkflow;

// ---------------------------------------------------------------------------
// FanoutReport
// ---------------------------------------------------------------------------

/// Result of one shard call.
#[derive(Debug, Clone, PartialEq)]
pub struct FanoutReport {
    /// Chunk ids actually selected for this call (deduplicated, or the
    /// pending set when none were requested).
    pub requested: Vec<String>,
    /// One entry per selected chunk, in selection order.
    pub results: Vec<ChunkRunResult>,
    /// Progress recomputed after the level completed.
    pub progress: Progress,
}

impl FanoutReport {
    /// True when every selected chunk succeeded.
    pub fn success(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }

    pub fn remaining(&self) -> usize {
        self.progress.pending.len()
    }

    pub fn next_action(&self) -> NextAction {
        if self.progress.pending.is_empty() {
            NextAction::Synthesize
        } else {
            NextAction::Shard
        }
    }
}

// ---------------------------------------------------------------------------
// FanoutExecutor
// ---------------------------------------------------------------------------

/// Runs selected chunks concurrently, capped at `max_concurrency`.
pub struct FanoutExecutor<W: ChunkedWorkflow, S: SessionStore> {
    workflow: Arc<W>,
    records: SessionRecords<S>,
    tracker: ProgressTracker<S>,
    max_concurrency: usize,
    step_timeout: Duration,
}

impl<W: ChunkedWorkflow, S: SessionStore + 'static> FanoutExecutor<W, S> {
    pub fn new(
        workflow: Arc<W>,
        records: SessionRecords<S>,
        max_concurrency: usize,
        step_timeout: Duration,
    ) -> Self {
        Self {
            workflow,
            tracker: ProgressTracker::new(records.clone()),
            records,
            max_concurrency: max_concurrency.max(1),
            step_timeout,
        }
    }

    /// Execute `requested` chunk ids (or every pending chunk when empty).
    ///
    /// Unknown ids fail the whole call before any work is done.
    pub async fn run_selected(
        &self,
        session: &WorkflowSession,
        requested: &[String],
    ) -> Result<FanoutReport, EngineError> {
        let session_id = session.session_id.as_str();
        let selected = select_chunks(session, requested)?;

        let selected = if selected.is_empty() {
            let progress = self.tracker.progress(session_id, &session.plan).await?;
            if progress.is_done() {
                tracing::debug!(session_id, "no pending chunks; ready for synthesize");
                return Ok(FanoutReport {
                    requested: Vec::new(),
                    results: Vec::new(),
                    progress,
                });
            }
            progress.pending
        } else {
            selected
        };

        tracing::info!(
            session_id,
            chunks = selected.len(),
            max_concurrency = self.max_concurrency,
            "running shard level"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut join_set = JoinSet::new();
        let mut task_chunks = HashMap::new();

        for chunk_id in &selected {
            let Some(chunk) = session.plan.get(chunk_id).cloned() else {
                continue;
            };
            let workflow = Arc::clone(&self.workflow);
            let records = self.records.clone();
            let semaphore = Arc::clone(&semaphore);
            let session_id = session_id.to_string();
            let step_timeout = self.step_timeout;

            let handle = join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return ChunkRunResult::failed(&chunk.chunk_id, 0, "executor shut down");
                    }
                };
                run_chunk(workflow, records, session_id, chunk, step_timeout).await
            });
            task_chunks.insert(handle.id(), chunk_id.clone());
        }

        let mut by_chunk: HashMap<String, ChunkRunResult> = HashMap::new();
        while let Some(joined) = join_set.join_next_with_id().await {
            match joined {
                Ok((_, result)) => {
                    by_chunk.insert(result.chunk_id.clone(), result);
                }
                Err(join_err) => {
                    // A panicking chunk is reported like any other failure.
                    if let Some(chunk_id) = task_chunks.get(&join_err.id()) {
                        tracing::warn!(
                            session_id,
                            chunk_id = chunk_id.as_str(),
                            error = %join_err,
                            "chunk task aborted"
                        );
                        by_chunk.insert(
                            chunk_id.clone(),
                            ChunkRunResult::failed(chunk_id, 0, format!("chunk task failed: {join_err}")),
                        );
                    }
                }
            }
        }

        let results: Vec<ChunkRunResult> = selected
            .iter()
            .filter_map(|id| by_chunk.remove(id))
            .collect();

        let progress = self.tracker.progress(session_id, &session.plan).await?;

        tracing::info!(
            session_id,
            succeeded = results.iter().filter(|r| r.success).count(),
            failed = results.iter().filter(|r| !r.success).count(),
            remaining = progress.pending.len(),
            "shard level complete"
        );

        Ok(FanoutReport {
            requested: selected,
            results,
            progress,
        })
    }
}

/// Deduplicate (keeping first occurrence) and validate requested ids.
pub(crate) fn select_chunks(
    session: &WorkflowSession,
    requested: &[String],
) -> Result<Vec<String>, ValidationError> {
    let mut seen = HashSet::new();
    let deduped: Vec<String> = requested
        .iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect();

    let unknown: Vec<String> = deduped
        .iter()
        .filter(|id| !session.plan.contains(id))
        .cloned()
        .collect();

    if !unknown.is_empty() {
        return Err(ValidationError::UnknownChunkIds { ids: unknown });
    }

    Ok(deduped)
}

/// Drive one chunk until its sub-queue drains or a step fails.
async fn run_chunk<W: ChunkedWorkflow, S: SessionStore>(
    workflow: Arc<W>,
    records: SessionRecords<S>,
    session_id: String,
    chunk: ChunkDescriptor,
    step_timeout: Duration,
) -> ChunkRunResult {
    let chunk_id = chunk.chunk_id.clone();

    let mut state = match records.load_child(&session_id, &chunk_id).await {
        Ok(Some(state)) => state,
        Ok(None) => ChunkChildState::seeded(&session_id, &chunk),
        Err(e) => return ChunkRunResult::failed(&chunk_id, 0, e.to_string()),
    };

    if state.is_complete() && state.steps_taken > 0 {
        tracing::debug!(
            session_id = session_id.as_str(),
            chunk_id = chunk_id.as_str(),
            "chunk already complete"
        );
        return ChunkRunResult::succeeded(&chunk_id, 0, state.result);
    }

    let mut steps = 0u32;
    loop {
        let before = state.remaining.len();
        let mut attempt = state.clone();
        attempt.status = ChildStatus::Running;
        attempt.error = None;

        let outcome = tokio::time::timeout(step_timeout, workflow.step(&chunk, attempt)).await;

        let mut next = match outcome {
            Ok(Ok(next)) => next,
            Ok(Err(step_err)) => {
                let message = step_err.to_string();
                record_failure(&records, &mut state, &message).await;
                return ChunkRunResult::failed(&chunk_id, steps, message);
            }
            Err(_elapsed) => {
                // The attempt is abandoned without touching the child record.
                let err = EngineError::Timeout {
                    operation: format!("step for chunk '{chunk_id}'"),
                    after: step_timeout,
                };
                tracing::warn!(
                    session_id = session_id.as_str(),
                    chunk_id = chunk_id.as_str(),
                    "step timed out"
                );
                return ChunkRunResult::failed(&chunk_id, steps, err.to_string());
            }
        };

        if before > 0 && next.remaining.len() >= before {
            let message = "step made no progress on the chunk sub-queue".to_string();
            record_failure(&records, &mut state, &message).await;
            return ChunkRunResult::failed(&chunk_id, steps, message);
        }

        // Identity fields belong to the engine, not the callback.
        next.child_id = state.child_id.clone();
        next.session_id = state.session_id.clone();
        next.chunk_id = state.chunk_id.clone();
        next.schema_version = state.schema_version;
        next.steps_taken = state.steps_taken + 1;
        next.error = None;
        next.status = if next.is_complete() {
            ChildStatus::Completed
        } else {
            ChildStatus::Running
        };
        next.touch();

        if let Err(e) = records.save_child(&next).await {
            return ChunkRunResult::failed(&chunk_id, steps, e.to_string());
        }
        steps += 1;
        state = next;

        if state.is_complete() {
            tracing::debug!(
                session_id = session_id.as_str(),
                chunk_id = chunk_id.as_str(),
                steps,
                "chunk complete"
            );
            return ChunkRunResult::succeeded(&chunk_id, steps, state.result);
        }
    }
}

/// Mark the chunk failed, keeping its sub-queue intact for a later retry.
async fn record_failure<S: SessionStore>(
    records: &SessionRecords<S>,
    state: &mut ChunkChildState,
    message: &str,
) {
    state.status = ChildStatus::Failed;
    state.error = Some(message.to_string());
    state.touch();
    if let Err(e) = records.save_child(state).await {
        tracing::warn!(
            child_id = state.child_id.as_str(),
            error = %e,
            "failed to record chunk failure"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
