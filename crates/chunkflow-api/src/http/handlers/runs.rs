//! Server-Sent Events endpoints for long-running auto-complete calls.
//!
//! POST /api/v1/workflows/{workflow_type}/auto-complete
//! POST /api/v1/sessions/{session_id}/complete
//!
//! The run executes on its own task; the response streams its progress.
//!
//! SSE event types:
//! - `heartbeat`: engine keep-alive tick `{ session_id, phase, round, pending, completed, elapsed_ms }`
//! - `result`: run finished `{ session_id, shard_rounds, result }`
//! - `error`: run failed, as an error envelope `{ action, status, kind, message, ... }`
//!
//! Dropping the response (client disconnect) cancels the run at the next
//! shard boundary.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures_util::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use chunkflow_core::workflow::engine::CompletedRun;
use chunkflow_core::workflow::error::EngineError;
use chunkflow_core::workflow::heartbeat::{ChannelHeartbeat, HeartbeatTick};
use chunkflow_core::workflow::strategy::StartRequest;
use chunkflow_types::protocol::{ErrorEnvelope, ErrorKind};

use crate::http::error::AppError;
use crate::state::AppState;
use crate::workflows::document_digest::DocumentDigest;

const TICK_BUFFER: usize = 32;

type RunHandle = JoinHandle<Result<CompletedRun<DocumentDigest>, EngineError>>;

/// Request body for the auto-complete endpoint.
#[derive(Debug, Deserialize)]
pub struct AutoCompleteRequest {
    /// Workflow input, as for the `start` action.
    #[serde(default)]
    pub params: Value,
    pub batch_size: Option<usize>,
    pub max_items: Option<usize>,
}

/// POST /api/v1/workflows/{workflow_type}/auto-complete
///
/// Start a session and drive it to its synthesized result.
pub async fn auto_complete(
    State(state): State<AppState>,
    Path(workflow_type): Path<String>,
    Json(body): Json<AutoCompleteRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let engine = std::sync::Arc::clone(state.engine_for(&workflow_type)?);
    let request = StartRequest {
        params: body.params,
        batch_size: body.batch_size,
        max_items: body.max_items,
    };

    let (tx, ticks) = mpsc::channel(TICK_BUFFER);
    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    let run = tokio::spawn(async move {
        let heartbeat = ChannelHeartbeat::new(tx);
        engine.run_auto_complete(request, &heartbeat, &run_cancel).await
    });

    let events = run_events(ticks, run, cancel.drop_guard(), "auto-complete");
    Ok(Sse::new(events).keep_alive(keep_alive(&state)))
}

/// POST /api/v1/sessions/{session_id}/complete
///
/// Finish an existing session.
pub async fn complete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    if state.engine.load_session(&session_id).await?.is_none() {
        return Err(EngineError::SessionNotFound { session_id }.into());
    }

    let engine = std::sync::Arc::clone(&state.engine);
    let (tx, ticks) = mpsc::channel(TICK_BUFFER);
    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    let run = tokio::spawn(async move {
        let heartbeat = ChannelHeartbeat::new(tx);
        engine
            .run_complete_from_session(&session_id, &heartbeat, &run_cancel)
            .await
    });

    let events = run_events(ticks, run, cancel.drop_guard(), "complete");
    Ok(Sse::new(events).keep_alive(keep_alive(&state)))
}

fn keep_alive(state: &AppState) -> KeepAlive {
    KeepAlive::new().interval(Duration::from_secs(state.config.heartbeat_interval_secs))
}

/// Relay heartbeats until the run drops its sender, then emit the outcome.
fn run_events(
    mut ticks: mpsc::Receiver<HeartbeatTick>,
    run: RunHandle,
    guard: DropGuard,
    action: &'static str,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        // Held for the life of the stream; dropping it cancels the run.
        let _guard = guard;

        while let Some(tick) = ticks.recv().await {
            let data = serde_json::to_string(&tick).unwrap_or_default();
            yield Ok::<_, Infallible>(Event::default().event("heartbeat").data(data));
        }

        let event = match run.await {
            Ok(Ok(done)) => {
                tracing::info!(session_id = %done.session_id, rounds = done.shard_rounds, "run finished");
                let data = json!({
                    "session_id": done.session_id,
                    "shard_rounds": done.shard_rounds,
                    "result": done.result,
                });
                Event::default().event("result").data(data.to_string())
            }
            Ok(Err(e)) => {
                tracing::warn!(action, error = %e, "run failed");
                error_event(ErrorEnvelope::new(action, e.kind(), e.to_string()))
            }
            Err(join) => {
                tracing::error!(action, error = %join, "run task aborted");
                error_event(ErrorEnvelope::new(
                    action,
                    ErrorKind::Internal,
                    format!("run task aborted: {join}"),
                ))
            }
        };
        yield Ok(event);
    }
}

fn error_event(envelope: ErrorEnvelope) -> Event {
    let data = serde_json::to_string(&envelope).unwrap_or_default();
    Event::default().event("error").data(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;
    use chunkflow_types::protocol::{ActionRequest, ActionResponse};

    use crate::state::test_support::test_state;
    use crate::workflows::document_digest::WORKFLOW_TYPE;

    const TEXT: &str = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    /// `data:` payload of the first event named `name`.
    fn event_data(body: &str, name: &str) -> Option<Value> {
        let marker = format!("event: {name}\n");
        let start = body.find(&marker)? + marker.len();
        let line = body[start..].lines().find(|l| l.starts_with("data:"))?;
        serde_json::from_str(line.trim_start_matches("data:").trim()).ok()
    }

    #[tokio::test]
    async fn test_auto_complete_streams_heartbeats_then_result() {
        let (state, _dir) = test_state().await;
        let sse = auto_complete(
            State(state),
            Path(WORKFLOW_TYPE.to_string()),
            Json(AutoCompleteRequest {
                params: json!({"text": TEXT, "paragraphs_per_chunk": 2}),
                batch_size: None,
                max_items: None,
            }),
        )
        .await
        .unwrap();

        let body = body_text(sse.into_response()).await;
        let first = event_data(&body, "heartbeat").unwrap();
        assert_eq!(first["phase"], "starting");

        let result = event_data(&body, "result").unwrap();
        assert_eq!(result["shard_rounds"], 1);
        assert_eq!(result["result"]["total_paragraphs"], 3);
        assert_eq!(result["result"]["sections"][1]["chunk_id"], "section-2");
        assert!(event_data(&body, "error").is_none());
    }

    #[tokio::test]
    async fn test_auto_complete_reports_start_failure_as_error_event() {
        let (state, _dir) = test_state().await;
        let sse = auto_complete(
            State(state),
            Path(WORKFLOW_TYPE.to_string()),
            Json(AutoCompleteRequest {
                params: json!({}),
                batch_size: None,
                max_items: None,
            }),
        )
        .await
        .unwrap();

        let body = body_text(sse.into_response()).await;
        let error = event_data(&body, "error").unwrap();
        assert_eq!(error["kind"], "validation");
        assert_eq!(error["action"], "auto-complete");
    }

    #[tokio::test]
    async fn test_complete_session_finishes_a_started_session() {
        let (state, _dir) = test_state().await;
        let started = state
            .dispatcher
            .dispatch(ActionRequest::new("start").with_params(json!({"text": TEXT})))
            .await;
        let ActionResponse::Start(started) = started else {
            panic!("start failed: {started:?}");
        };

        let sse = complete_session(State(state.clone()), Path(started.session_id.clone()))
            .await
            .unwrap();
        let body = body_text(sse.into_response()).await;
        let result = event_data(&body, "result").unwrap();
        assert_eq!(result["session_id"], started.session_id.as_str());
        assert_eq!(result["result"]["total_words"], 6);
    }

    #[tokio::test]
    async fn test_complete_unknown_session_is_not_found() {
        let (state, _dir) = test_state().await;
        let err = complete_session(State(state), Path("ghost".to_string()))
            .await
            .err()
            .unwrap();
        assert_eq!(err.into_response().status(), axum::http::StatusCode::NOT_FOUND);
    }
}
