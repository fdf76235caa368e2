//! Action protocol endpoint.
//!
//! POST /api/v1/workflows/{workflow_type}/actions
//!
//! Forwards one `ActionRequest` to the dispatcher and returns its reply
//! verbatim. The HTTP status follows the reply: error envelopes map through
//! [`status_for`], a synthesize blocked on pending chunks is `409 Conflict`,
//! everything else is `200 OK`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use chunkflow_types::protocol::{ActionRequest, ActionResponse};

use crate::http::error::{status_for, AppError};
use crate::state::AppState;

/// POST /api/v1/workflows/{workflow_type}/actions
pub async fn dispatch_action(
    State(state): State<AppState>,
    Path(workflow_type): Path<String>,
    Json(request): Json<ActionRequest>,
) -> Result<Response, AppError> {
    state.engine_for(&workflow_type)?;

    let response = state.dispatcher.dispatch(request).await;
    let status = response_status(&response);
    Ok((status, Json(response)).into_response())
}

fn response_status(response: &ActionResponse) -> StatusCode {
    match response {
        ActionResponse::Error(envelope) => status_for(envelope.kind),
        ActionResponse::Synthesize(synth) if !synth.outcome.success => StatusCode::CONFLICT,
        _ => StatusCode::OK,
    }
}
