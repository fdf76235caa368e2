//! Application error type mapping to HTTP status codes.
//!
//! Engine failures are rendered with the same `ErrorEnvelope` shape the action
//! protocol uses, so HTTP clients parse one error format regardless of which
//! endpoint failed.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use chunkflow_core::workflow::error::EngineError;
use chunkflow_types::protocol::{ErrorEnvelope, ErrorKind};

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Error raised by the workflow engine.
    Engine(EngineError),
    /// No workflow registered under the requested type.
    UnknownWorkflow(String),
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        AppError::Engine(e)
    }
}

/// HTTP status for an error category.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::PendingBlock => StatusCode::CONFLICT,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Cancelled
        | ErrorKind::Stalled
        | ErrorKind::Workflow
        | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl AppError {
    /// The envelope this error renders as.
    pub fn envelope(&self) -> ErrorEnvelope {
        match self {
            AppError::Engine(e) => ErrorEnvelope::new("", e.kind(), e.to_string()),
            AppError::UnknownWorkflow(workflow_type) => ErrorEnvelope::new(
                "",
                ErrorKind::NotFound,
                format!("unknown workflow type '{workflow_type}'"),
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let envelope = self.envelope();
        if envelope.kind == ErrorKind::Internal {
            tracing::error!(error = %envelope.message, "request failed");
        }
        (status_for(envelope.kind), Json(envelope)).into_response()
    }
}
