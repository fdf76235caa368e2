//! Workflow lifecycle: `start -> shard* -> synthesize`.
//!
//! `WorkflowEngine` owns one [`ChunkedWorkflow`] implementation and a
//! [`SessionStore`]. Every operation re-reads the session record, so a
//! lifecycle can be driven across processes (each call is independent) or in
//! one call through the auto-complete runners. Parent writes go through
//! [`SessionRecords::update_session`] and touch only the fields they own.

use std::sync::Arc;

use chunkflow_types::config::EngineConfig;
use chunkflow_types::error::WorkflowError;
use chunkflow_types::session::{BatchState, ChunkPlan, SessionStatus, WorkflowSession};
use chunkflow_types::step::StepResult;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::storage::records::{RecordError, SessionRecords};
use crate::storage::session_store::SessionStore;

use super::batch::{declared_batch_count, BatchCache, BatchPage};
use super::document::{page_document, DocumentPage};
use super::error::{EngineError, ValidationError};
use super::fanout::{select_chunks, FanoutExecutor, FanoutReport};
use super::guard::require_session;
use super::heartbeat::{with_keepalive, Heartbeat, HeartbeatTick, RunPhase};
use super::progress::{Progress, ProgressTracker};
use super::strategy::{ChunkedWorkflow, StartRequest};

/// Result of a successful `start`.
#[derive(Debug, Clone, PartialEq)]
pub struct StartOutcome {
    pub session_id: String,
    pub chunk_plan_size: usize,
    pub preview: Vec<Value>,
    pub batch_count: usize,
}

/// Result of an auto-complete run.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedRun<T> {
    pub session_id: String,
    /// Shard rounds executed by this call (0 when nothing was pending).
    pub shard_rounds: u32,
    pub result: T,
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

pub struct WorkflowEngine<W: ChunkedWorkflow, S: SessionStore> {
    workflow: Arc<W>,
    records: SessionRecords<S>,
    tracker: ProgressTracker<S>,
    executor: FanoutExecutor<W, S>,
    cache: BatchCache<W, S>,
    config: EngineConfig,
}

impl<W: ChunkedWorkflow, S: SessionStore + 'static> WorkflowEngine<W, S> {
    pub fn new(workflow: W, store: Arc<S>, config: EngineConfig) -> Self {
        let config = config.normalized();
        let workflow = Arc::new(workflow);
        let records = SessionRecords::new(store);

        Self {
            tracker: ProgressTracker::new(records.clone()),
            executor: FanoutExecutor::new(
                Arc::clone(&workflow),
                records.clone(),
                config.max_concurrency,
                config.step_timeout(),
            ),
            cache: BatchCache::new(Arc::clone(&workflow), records.clone(), config.fetch_timeout()),
            workflow,
            records,
            config,
        }
    }

    pub fn workflow_type(&self) -> &str {
        self.workflow.workflow_type()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn records(&self) -> &SessionRecords<S> {
        &self.records
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Build the chunk plan and persist a new session.
    pub async fn start(&self, request: StartRequest) -> Result<StartOutcome, EngineError> {
        if request.batch_size == Some(0) {
            return Err(ValidationError::InvalidBatchSize.into());
        }

        let plan = self.workflow.start(&request).await?;
        let chunk_plan = ChunkPlan::from_seeds(plan.chunks)
            .map_err(|ids| ValidationError::DuplicateChunkIds { ids })?;

        let mut batch = BatchState::new(
            request.batch_size.unwrap_or(self.config.default_batch_size),
            request.max_items.unwrap_or(plan.max_items),
        );
        batch.ordering = plan.ordering;

        let session_id = Uuid::now_v7().to_string();
        let mut session = WorkflowSession::new(
            session_id.clone(),
            self.workflow.workflow_type().to_string(),
            chunk_plan,
            batch,
        );
        session.extensions = plan.extensions;
        self.records.save_session(&session).await?;

        let mut preview = plan.preview;
        preview.truncate(self.config.preview_limit);

        tracing::info!(
            session_id = session_id.as_str(),
            workflow_type = self.workflow.workflow_type(),
            chunks = session.plan.len(),
            "workflow session started"
        );

        Ok(StartOutcome {
            session_id,
            chunk_plan_size: session.plan.len(),
            preview,
            batch_count: declared_batch_count(&session.batch),
        })
    }

    /// Run the selected chunks (all pending when `chunk_ids` is empty).
    pub async fn shard(
        &self,
        session_id: Option<&str>,
        chunk_ids: &[String],
    ) -> Result<FanoutReport, EngineError> {
        let session = self.require(session_id, "shard").await?;
        select_chunks(&session, chunk_ids)?;

        // Persisted before any chunk runs.
        if session.status == SessionStatus::Started {
            self.records
                .update_session(&session.session_id, |s| {
                    if s.status == SessionStatus::Started {
                        s.status = SessionStatus::Sharding;
                    }
                })
                .await?;
        }

        self.executor.run_selected(&session, chunk_ids).await
    }

    /// Merge completed chunks into the final artifact.
    ///
    /// Fails with `PendingBlock` while any chunk is outstanding; the callback
    /// is not invoked in that case. A session already `done` returns its
    /// stored result.
    pub async fn synthesize(
        &self,
        session_id: Option<&str>,
    ) -> Result<StepResult<W::Output>, EngineError> {
        let session = self.require(session_id, "synthesize").await?;
        self.synthesize_session(session)
            .await
            .map(StepResult::finished)
    }

    /// Serve one page of the session's result set.
    pub async fn batch(
        &self,
        session_id: Option<&str>,
        batch_index: Option<i64>,
    ) -> Result<BatchPage, EngineError> {
        let mut session = self.require(session_id, "batch").await?;
        let batch_index = batch_index.ok_or(ValidationError::MissingBatchIndex)?;
        self.cache.get_batch(&mut session, batch_index).await
    }

    /// The session's full row set, deduplicated and sorted by its declared
    /// ordering. `batch_size` of `None` or 0 returns every row; otherwise one
    /// page (`batch_index` defaults to 0).
    ///
    /// Rows are fetched fresh on every call and never touch the batch cache.
    pub async fn document(
        &self,
        session_id: Option<&str>,
        batch_size: Option<usize>,
        batch_index: Option<i64>,
    ) -> Result<DocumentPage, EngineError> {
        let session = self.require(session_id, "document").await?;
        let ordering = session.batch.ordering.clone().ok_or_else(|| {
            ValidationError::NoDocumentOrdering {
                session_id: session.session_id.clone(),
            }
        })?;

        let rows = self.cache.fetch_rows(&session).await?;
        Ok(page_document(rows, &ordering, batch_size, batch_index.unwrap_or(0))?)
    }

    /// Clear the session's cached rows; the next `batch` call re-fetches.
    pub async fn invalidate_cache(&self, session_id: &str) -> Result<(), EngineError> {
        self.require(Some(session_id), "invalidate").await?;
        self.cache.invalidate(session_id).await?;
        Ok(())
    }

    pub async fn progress(&self, session_id: &str) -> Result<Progress, EngineError> {
        let session = self.require(Some(session_id), "progress").await?;
        Ok(self.tracker.progress(session_id, &session.plan).await?)
    }

    pub async fn load_session(&self, session_id: &str) -> Result<Option<WorkflowSession>, EngineError> {
        Ok(self.records.load_session(session_id).await?)
    }

    /// Delete the session and its child records.
    pub async fn purge(&self, session_id: &str) -> Result<usize, EngineError> {
        let removed = self.records.purge_session(session_id).await?;
        self.cache.forget(session_id);
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Auto-complete
    // -----------------------------------------------------------------------

    /// Start a session and drive it to a synthesized result in one call.
    pub async fn run_auto_complete(
        &self,
        request: StartRequest,
        heartbeat: &dyn Heartbeat,
        cancel: &CancellationToken,
    ) -> Result<CompletedRun<W::Output>, EngineError> {
        let clock = Instant::now();
        let started = self.start(request).await?;
        heartbeat.beat(&HeartbeatTick {
            session_id: started.session_id.clone(),
            phase: RunPhase::Starting,
            round: 0,
            pending: started.chunk_plan_size,
            completed: 0,
            elapsed_ms: elapsed_ms(clock),
        });
        self.drive(&started.session_id, heartbeat, cancel, clock).await
    }

    /// Finish an existing session from wherever it left off.
    pub async fn run_complete_from_session(
        &self,
        session_id: &str,
        heartbeat: &dyn Heartbeat,
        cancel: &CancellationToken,
    ) -> Result<CompletedRun<W::Output>, EngineError> {
        self.drive(session_id, heartbeat, cancel, Instant::now()).await
    }

    async fn drive(
        &self,
        session_id: &str,
        heartbeat: &dyn Heartbeat,
        cancel: &CancellationToken,
        clock: Instant,
    ) -> Result<CompletedRun<W::Output>, EngineError> {
        let session = self.require(Some(session_id), "shard").await?;
        let mut progress = self.tracker.progress(session_id, &session.plan).await?;
        let mut rounds = 0u32;

        while !progress.is_done() {
            if cancel.is_cancelled() {
                tracing::info!(session_id, rounds, "auto-complete cancelled");
                return Err(EngineError::Cancelled);
            }

            rounds += 1;
            let pending = progress.pending.len();
            let completed = progress.completed.len();
            let tick = || HeartbeatTick {
                session_id: session_id.to_string(),
                phase: RunPhase::Sharding,
                round: rounds,
                pending,
                completed,
                elapsed_ms: elapsed_ms(clock),
            };
            heartbeat.beat(&tick());

            let report = with_keepalive(
                self.shard(Some(session_id), &[]),
                heartbeat,
                self.config.heartbeat_interval(),
                tick,
            )
            .await?;

            // Completed chunks are already persisted; a resume picks up from here.
            if cancel.is_cancelled() {
                tracing::info!(session_id, rounds, "auto-complete cancelled after shard round");
                return Err(EngineError::Cancelled);
            }

            if report.progress.completed.len() <= completed {
                let failures = report.results.into_iter().filter(|r| !r.success).collect();
                tracing::warn!(session_id, rounds, pending, "auto-complete stalled");
                return Err(EngineError::Stalled {
                    pending: report.progress.pending,
                    failures,
                });
            }
            progress = report.progress;
        }

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        heartbeat.beat(&HeartbeatTick {
            session_id: session_id.to_string(),
            phase: RunPhase::Synthesizing,
            round: rounds,
            pending: 0,
            completed: progress.completed.len(),
            elapsed_ms: elapsed_ms(clock),
        });

        let session = self.require(Some(session_id), "synthesize").await?;
        let result = self.synthesize_session(session).await?;

        tracing::info!(session_id, rounds, elapsed_ms = elapsed_ms(clock), "auto-complete finished");

        Ok(CompletedRun {
            session_id: session_id.to_string(),
            shard_rounds: rounds,
            result,
        })
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn require(
        &self,
        session_id: Option<&str>,
        action: &str,
    ) -> Result<WorkflowSession, EngineError> {
        require_session(&self.records, action, session_id, self.workflow.workflow_type()).await
    }

    async fn synthesize_session(
        &self,
        session: WorkflowSession,
    ) -> Result<W::Output, EngineError> {
        let session_id = session.session_id.clone();

        if session.status == SessionStatus::Done {
            if let Some(stored) = session.result.clone() {
                tracing::debug!(session_id = session_id.as_str(), "returning stored synthesize result");
                return serde_json::from_value(stored).map_err(|e| {
                    EngineError::Record(RecordError::Corrupt {
                        key: session_id,
                        reason: format!("stored result does not decode: {e}"),
                    })
                });
            }
        }

        let progress = self.tracker.progress(&session_id, &session.plan).await?;
        if !progress.is_done() {
            return Err(EngineError::PendingBlock {
                pending: progress.pending,
            });
        }

        let output = self.workflow.synthesize(progress.ordered_summaries).await?;
        let stored = serde_json::to_value(&output)
            .map_err(|e| WorkflowError::Failed(format!("synthesize output is not serializable: {e}")))?;

        self.records
            .update_session(&session_id, |s| {
                s.result = Some(stored);
                s.status = SessionStatus::Done;
            })
            .await?
            .ok_or_else(|| EngineError::SessionNotFound {
                session_id: session_id.clone(),
            })?;

        tracing::info!(
            session_id = session_id.as_str(),
            chunks = progress.completed.len(),
            "session synthesized"
        );
        Ok(output)
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
