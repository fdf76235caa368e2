//! Action protocol routing.
//!
//! The dispatcher is the single entry point for transports. It normalizes the
//! action name, forwards to the engine and folds every error into an in-band
//! [`ErrorEnvelope`], so `dispatch` always yields a well-formed response.

use std::sync::Arc;

use chunkflow_types::error::WorkflowError;
use chunkflow_types::protocol::{
    Action, ActionRequest, ActionResponse, BatchResponse, DocumentResponse, ErrorEnvelope,
    ErrorKind, ShardResponse, StartResponse, SynthesizeResponse,
};
use chunkflow_types::step::StepResult;
use serde_json::{json, Value};

use crate::storage::session_store::SessionStore;

use super::document::DocumentPage;
use super::engine::WorkflowEngine;
use super::error::{EngineError, ValidationError};
use super::strategy::{ChunkedWorkflow, StartRequest};

pub struct ActionDispatcher<W: ChunkedWorkflow, S: SessionStore> {
    engine: Arc<WorkflowEngine<W, S>>,
}

impl<W: ChunkedWorkflow, S: SessionStore> Clone for ActionDispatcher<W, S> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<W: ChunkedWorkflow, S: SessionStore + 'static> ActionDispatcher<W, S> {
    pub fn new(engine: Arc<WorkflowEngine<W, S>>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine<W, S>> {
        &self.engine
    }

    /// Route one request. Never fails; errors come back as envelopes.
    pub async fn dispatch(&self, request: ActionRequest) -> ActionResponse {
        let Some(action) = Action::parse(&request.action) else {
            let err = EngineError::from(ValidationError::UnknownAction {
                action: request.action.clone(),
            });
            return envelope(request.action.trim(), &request, &err);
        };

        tracing::debug!(
            action = action.as_str(),
            session_id = request.session_id.as_deref().unwrap_or(""),
            "dispatching action"
        );

        let outcome = match action {
            Action::Start => self.start(&request).await,
            Action::Shard => self.shard(&request).await,
            Action::Synthesize => self.synthesize(&request).await,
            Action::Batch => self.batch(&request).await,
            Action::Document => self.document(&request).await,
        };

        outcome.unwrap_or_else(|err| {
            tracing::warn!(action = action.as_str(), error = %err, "action failed");
            envelope(action.as_str(), &request, &err)
        })
    }

    async fn start(&self, request: &ActionRequest) -> Result<ActionResponse, EngineError> {
        let outcome = self
            .engine
            .start(StartRequest {
                params: request.params.clone().unwrap_or(Value::Null),
                batch_size: request.batch_size,
                max_items: request.max_items,
            })
            .await?;

        Ok(ActionResponse::Start(StartResponse {
            action: Action::Start.to_string(),
            message: format!(
                "session started with {} chunk(s); call shard to process them",
                outcome.chunk_plan_size
            ),
            session_id: outcome.session_id,
            batch_count: outcome.batch_count,
            chunk_count: outcome.chunk_plan_size,
            preview_results: outcome.preview,
            status: "started".to_string(),
        }))
    }

    async fn shard(&self, request: &ActionRequest) -> Result<ActionResponse, EngineError> {
        let report = self
            .engine
            .shard(request.session_id.as_deref(), &request.chunk_ids)
            .await?;

        Ok(ActionResponse::Shard(ShardResponse {
            action: Action::Shard.to_string(),
            success: report.success(),
            session_id: session_id_of(request),
            chunks_remaining: report.remaining(),
            next_action: report.next_action(),
            chunks_requested: report.requested,
            chunk_results: report.results,
            pending_chunk_ids: report.progress.pending,
            completed_chunk_ids: report.progress.completed,
        }))
    }

    async fn synthesize(&self, request: &ActionRequest) -> Result<ActionResponse, EngineError> {
        let session_id = session_id_of(request);
        let outcome = match self.engine.synthesize(request.session_id.as_deref()).await {
            Ok(step) => StepResult {
                success: step.success,
                state: step.state,
                result: step
                    .result
                    .map(serde_json::to_value)
                    .transpose()
                    .map_err(|e| {
                        WorkflowError::Failed(format!("synthesize output is not serializable: {e}"))
                    })?,
                error: step.error,
            },
            // Not a fault: report where the session stands.
            Err(err @ EngineError::PendingBlock { .. }) => {
                let progress = self.engine.progress(&session_id).await?;
                StepResult::blocked(
                    json!({
                        "pending_chunk_ids": progress.pending,
                        "completed_chunk_ids": progress.completed,
                    }),
                    err.to_string(),
                )
            }
            Err(err) => return Err(err),
        };

        Ok(ActionResponse::Synthesize(SynthesizeResponse {
            action: Action::Synthesize.to_string(),
            session_id,
            outcome,
        }))
    }

    async fn batch(&self, request: &ActionRequest) -> Result<ActionResponse, EngineError> {
        let page = self
            .engine
            .batch(request.session_id.as_deref(), request.batch_index)
            .await?;

        Ok(ActionResponse::Batch(BatchResponse {
            action: Action::Batch.to_string(),
            session_id: session_id_of(request),
            batch_index: page.batch_index,
            batch_count: page.batch_count,
            batch: page.rows,
            status: "ok".to_string(),
        }))
    }

    async fn document(&self, request: &ActionRequest) -> Result<ActionResponse, EngineError> {
        let page = self
            .engine
            .document(
                request.session_id.as_deref(),
                request.batch_size,
                request.batch_index,
            )
            .await?;

        let mut response = DocumentResponse {
            action: Action::Document.to_string(),
            session_id: session_id_of(request),
            rows: Vec::new(),
            batch_index: None,
            batch_count: None,
            count: None,
            total_count: 0,
            status: "ok".to_string(),
        };
        match page {
            DocumentPage::Paged {
                rows,
                batch_index,
                batch_count,
                total_count,
            } => {
                response.rows = rows;
                response.batch_index = Some(batch_index);
                response.batch_count = Some(batch_count);
                response.total_count = total_count;
            }
            DocumentPage::Whole {
                rows,
                count,
                total_count,
            } => {
                response.rows = rows;
                response.count = Some(count);
                response.total_count = total_count;
            }
        }
        Ok(ActionResponse::Document(response))
    }
}

fn session_id_of(request: &ActionRequest) -> String {
    request
        .session_id
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .to_string()
}

fn envelope(action: &str, request: &ActionRequest, err: &EngineError) -> ActionResponse {
    let mut envelope = ErrorEnvelope::new(action, err.kind(), err.to_string());
    envelope.session_id = request
        .session_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string);

    if let EngineError::Validation(ValidationError::BatchIndexOutOfRange { index, batch_count }) =
        err
    {
        envelope.batch_index = Some(*index);
        envelope.batch_count = Some(*batch_count);
    } else if envelope.kind == ErrorKind::Validation || envelope.kind == ErrorKind::Timeout {
        envelope.batch_index = request.batch_index;
    }

    ActionResponse::Error(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemorySessionStore;
    use crate::workflow::testing::CountingWorkflow;
    use chunkflow_types::config::EngineConfig;

    fn dispatcher() -> ActionDispatcher<CountingWorkflow, InMemorySessionStore> {
        let engine = WorkflowEngine::new(
            CountingWorkflow::default(),
            Arc::new(InMemorySessionStore::new()),
            EngineConfig::default(),
        );
        ActionDispatcher::new(Arc::new(engine))
    }

    async fn start(dispatcher: &ActionDispatcher<CountingWorkflow, InMemorySessionStore>) -> String {
        let response = dispatcher
            .dispatch(ActionRequest::new("start").with_params(json!({"chunks": 2, "rows": 7})))
            .await;
        match response {
            ActionResponse::Start(start) => start.session_id,
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_action_lists_vocabulary() {
        let response = dispatcher().dispatch(ActionRequest::new("merge")).await;
        let err = response.error().unwrap();
        assert_eq!(err.action, "merge");
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.message.contains("start | shard | synthesize | batch"));
    }

    #[tokio::test]
    async fn aliases_route_to_canonical_actions() {
        let dispatcher = dispatcher();
        let response = dispatcher
            .dispatch(ActionRequest::new("fetch").with_params(json!({"chunks": 1})))
            .await;
        let ActionResponse::Start(start) = response else {
            panic!("fetch should start a session");
        };

        let response = dispatcher
            .dispatch(ActionRequest::new("chunk").with_session(&start.session_id))
            .await;
        let ActionResponse::Shard(shard) = response else {
            panic!("chunk should shard");
        };
        assert_eq!(shard.action, "shard");
        assert!(shard.success);
    }

    #[tokio::test]
    async fn missing_session_id_is_validation_error() {
        let response = dispatcher().dispatch(ActionRequest::new("synthesize")).await;
        let err = response.error().unwrap();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.message, "session_id is required for 'synthesize'");
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let response = dispatcher()
            .dispatch(ActionRequest::new("shard").with_session("ghost"))
            .await;
        let err = response.error().unwrap();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.session_id.as_deref(), Some("ghost"));
    }

    #[tokio::test]
    async fn pending_synthesize_reports_state() {
        let dispatcher = dispatcher();
        let session_id = start(&dispatcher).await;
        dispatcher
            .dispatch(
                ActionRequest::new("shard")
                    .with_session(&session_id)
                    .with_chunk_ids(["chunk-2"]),
            )
            .await;

        let response = dispatcher
            .dispatch(ActionRequest::new("synthesize").with_session(&session_id))
            .await;
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["state"]["pending_chunk_ids"], json!(["chunk-1"]));
        assert_eq!(json["state"]["completed_chunk_ids"], json!(["chunk-2"]));
        assert!(json["error"].as_str().unwrap().contains("chunk-1"));
    }

    #[tokio::test]
    async fn batch_range_error_carries_bounds() {
        let dispatcher = dispatcher();
        let session_id = start(&dispatcher).await;

        let response = dispatcher
            .dispatch(
                ActionRequest::new("batch")
                    .with_session(&session_id)
                    .with_batch_index(-1),
            )
            .await;
        let err = response.error().unwrap();
        assert_eq!(err.batch_index, Some(-1));
        assert_eq!(err.batch_count, Some(1));
        assert_eq!(err.message, "batch_index must be 0..0");
    }

    #[tokio::test]
    async fn full_lifecycle_through_dispatch() {
        let dispatcher = dispatcher();
        let session_id = start(&dispatcher).await;

        let response = dispatcher
            .dispatch(ActionRequest::new("shard").with_session(&session_id))
            .await;
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["next_action"], "synthesize");
        assert_eq!(json["chunks_remaining"], 0);

        let response = dispatcher
            .dispatch(ActionRequest::new("synthesize").with_session(&session_id))
            .await;
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["result"]["total"], 2);

        let response = dispatcher
            .dispatch(
                ActionRequest::new("batch")
                    .with_session(&session_id)
                    .with_batch_index(0),
            )
            .await;
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["batch"].as_array().unwrap().len(), 7);
        assert_eq!(json["status"], "ok");
    }

    async fn start_document(
        dispatcher: &ActionDispatcher<CountingWorkflow, InMemorySessionStore>,
    ) -> String {
        let rows = json!([
            {"position": 2, "text": "c"},
            {"position": 0, "text": "a"},
            {"position": 2, "text": "dup"},
            {"position": 1, "text": "b"},
        ]);
        let response = dispatcher
            .dispatch(ActionRequest::new("start").with_params(json!({
                "chunks": 1,
                "rows": rows,
                "ordering": {"order_key": "position"},
            })))
            .await;
        match response {
            ActionResponse::Start(start) => start.session_id,
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn document_without_batch_size_returns_whole_set() {
        let dispatcher = dispatcher();
        let session_id = start_document(&dispatcher).await;

        for batch_size in [None, Some(0)] {
            let mut request = ActionRequest::new("document").with_session(&session_id);
            request.batch_size = batch_size;
            let json = serde_json::to_value(dispatcher.dispatch(request).await).unwrap();

            assert_eq!(json["action"], "document");
            assert_eq!(json["count"], 3);
            assert_eq!(json["total_count"], 4);
            assert!(json.get("batch_count").is_none());
            let texts: Vec<&str> = json["rows"]
                .as_array()
                .unwrap()
                .iter()
                .map(|r| r["text"].as_str().unwrap())
                .collect();
            assert_eq!(texts, vec!["a", "b", "c"]);
        }
    }

    #[tokio::test]
    async fn document_pages_when_batch_size_given() {
        let dispatcher = dispatcher();
        let session_id = start_document(&dispatcher).await;

        let mut request = ActionRequest::new("document")
            .with_session(&session_id)
            .with_batch_index(1);
        request.batch_size = Some(2);
        let response = dispatcher.dispatch(request).await;
        let ActionResponse::Document(page) = response else {
            panic!("unexpected response: {response:?}");
        };
        assert_eq!(page.batch_index, Some(1));
        assert_eq!(page.batch_count, Some(2));
        assert_eq!(page.count, None);
        assert_eq!(page.rows, vec![json!({"position": 2, "text": "c"})]);

        // The document view never fills the batch cache.
        let session = dispatcher.engine().load_session(&session_id).await.unwrap().unwrap();
        assert!(!session.batch.cache_ready);
    }

    #[tokio::test]
    async fn document_requires_declared_ordering() {
        let dispatcher = dispatcher();
        let session_id = start(&dispatcher).await;

        let response = dispatcher
            .dispatch(ActionRequest::new("document").with_session(&session_id))
            .await;
        let err = response.error().unwrap();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.message.contains("declares no document ordering"));
    }
}
