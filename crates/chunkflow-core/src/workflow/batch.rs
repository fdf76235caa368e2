//! Lazily filled, paginated result cache.
//!
//! The full result set is fetched at most once per session, on the first
//! `batch` request, and persisted on the session record. Later pages slice
//! the stored rows without calling the workflow again. Concurrent first
//! requests queue on a per-session fill gate; only the first one fetches.

use std::sync::Arc;
use std::time::Duration;

use chunkflow_types::session::{BatchState, WorkflowSession};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::storage::records::SessionRecords;
use crate::storage::session_store::SessionStore;

use super::document::prepare_document_rows;
use super::error::{EngineError, ValidationError};
use super::strategy::ChunkedWorkflow;

// ---------------------------------------------------------------------------
// Paging arithmetic
// ---------------------------------------------------------------------------

/// `ceil(total / size)`, or 0 when either side is 0.
pub fn batch_count(total: usize, batch_size: usize) -> usize {
    if total == 0 || batch_size == 0 {
        return 0;
    }
    total.div_ceil(batch_size)
}

/// Batch count implied by the session's declared bounds, before any fetch.
pub fn declared_batch_count(batch: &BatchState) -> usize {
    batch_count(batch.max_items.max(batch.batch_size), batch.batch_size)
}

/// Rows of page `index`. Empty when the page lies past the end.
pub fn slice_batch(rows: &[Value], batch_size: usize, index: usize) -> &[Value] {
    let start = index.saturating_mul(batch_size);
    if start >= rows.len() {
        return &[];
    }
    let end = start.saturating_add(batch_size).min(rows.len());
    &rows[start..end]
}

/// Check `index` against `[0, batch_count)`.
pub fn validate_batch_index(index: i64, batch_count: usize) -> Result<usize, ValidationError> {
    match usize::try_from(index) {
        Ok(i) if i < batch_count => Ok(i),
        _ => Err(ValidationError::BatchIndexOutOfRange { index, batch_count }),
    }
}

/// One served page.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPage {
    pub rows: Vec<Value>,
    pub batch_index: usize,
    pub batch_count: usize,
}

// ---------------------------------------------------------------------------
// BatchCache
// ---------------------------------------------------------------------------

/// Serves pages from a session's cached rows, filling the cache on demand.
pub struct BatchCache<W: ChunkedWorkflow, S: SessionStore> {
    workflow: Arc<W>,
    records: SessionRecords<S>,
    fetch_timeout: Duration,
    fill_gates: DashMap<String, Arc<Mutex<()>>>,
}

impl<W: ChunkedWorkflow, S: SessionStore> BatchCache<W, S> {
    pub fn new(workflow: Arc<W>, records: SessionRecords<S>, fetch_timeout: Duration) -> Self {
        Self {
            workflow,
            records,
            fetch_timeout,
            fill_gates: DashMap::new(),
        }
    }

    /// Return page `batch_index` of the session's result set.
    ///
    /// `session` is refreshed with the stored record after a fill. A fetch
    /// that misses its deadline leaves the record untouched, so the next
    /// request retries from scratch.
    pub async fn get_batch(
        &self,
        session: &mut WorkflowSession,
        batch_index: i64,
    ) -> Result<BatchPage, EngineError> {
        let declared = declared_batch_count(&session.batch);
        validate_batch_index(batch_index, declared)?;

        if !session.batch.cache_ready {
            self.fill(session).await?;
        }

        let batch = &session.batch;
        let actual = batch_count(batch.rows.len(), batch.batch_size).min(declared);
        let index = validate_batch_index(batch_index, actual)?;

        Ok(BatchPage {
            rows: slice_batch(&batch.rows, batch.batch_size, index).to_vec(),
            batch_index: index,
            batch_count: actual,
        })
    }

    /// Drop cached rows so the next `get_batch` fetches again.
    pub async fn invalidate(&self, session_id: &str) -> Result<WorkflowSession, EngineError> {
        let gate = self.fill_gate(session_id);
        let _fill = gate.lock().await;

        let session = self
            .records
            .update_session(session_id, |s| {
                s.batch.cache_ready = false;
                s.batch.rows.clear();
            })
            .await?
            .ok_or_else(|| EngineError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        tracing::info!(session_id, "batch cache invalidated");
        Ok(session)
    }

    /// Drop the fill gate of a purged session.
    pub fn forget(&self, session_id: &str) {
        self.fill_gates.remove(session_id);
    }

    /// Fetch the workflow's full row set under the fetch deadline.
    pub async fn fetch_rows(&self, session: &WorkflowSession) -> Result<Vec<Value>, EngineError> {
        let session_id = session.session_id.as_str();
        tokio::time::timeout(self.fetch_timeout, self.workflow.fetch_rows(session))
            .await
            .map_err(|_| {
                tracing::warn!(session_id, "batch fetch timed out");
                EngineError::Timeout {
                    operation: "batch fetch".to_string(),
                    after: self.fetch_timeout,
                }
            })?
            .map_err(EngineError::from)
    }

    fn fill_gate(&self, session_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.fill_gates.entry(session_id.to_string()).or_default().value())
    }

    async fn fill(&self, session: &mut WorkflowSession) -> Result<(), EngineError> {
        let session_id = session.session_id.clone();
        let gate = self.fill_gate(&session_id);
        let _fill = gate.lock().await;

        // Another request may have filled the cache while this one waited.
        if let Some(stored) = self.records.load_session(&session_id).await? {
            if stored.batch.cache_ready {
                *session = stored;
                return Ok(());
            }
        }

        tracing::debug!(session_id = session_id.as_str(), "filling batch cache");
        let fetched = self.fetch_rows(session).await?;

        let mut rows = match &session.batch.ordering {
            Some(ordering) => prepare_document_rows(fetched, ordering).rows,
            None => fetched,
        };
        if session.batch.max_items > 0 {
            rows.truncate(session.batch.max_items);
        }

        let updated = self
            .records
            .update_session(&session_id, |s| {
                s.batch.rows = rows;
                s.batch.cache_ready = true;
            })
            .await?
            .ok_or_else(|| EngineError::SessionNotFound {
                session_id: session_id.clone(),
            })?;
        *session = updated;

        tracing::info!(
            session_id = session_id.as_str(),
            rows = session.batch.rows.len(),
            "batch cache ready"
        );
        Ok(())
    }
}
