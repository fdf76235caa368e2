//! Request guardrails shared by the engine and the dispatcher.

use chunkflow_types::session::WorkflowSession;

use crate::storage::records::SessionRecords;
use crate::storage::session_store::SessionStore;

use super::error::{EngineError, ValidationError};

/// Load the session an action targets, rejecting anything it must not touch.
///
/// - missing or blank id -> `MissingSessionId`
/// - no record -> `SessionNotFound`
/// - record owned by another workflow type -> `WorkflowMismatch`
pub async fn require_session<S: SessionStore>(
    records: &SessionRecords<S>,
    action: &str,
    session_id: Option<&str>,
    workflow_type: &str,
) -> Result<WorkflowSession, EngineError> {
    let session_id = match session_id.map(str::trim) {
        Some(id) if !id.is_empty() => id,
        _ => {
            return Err(ValidationError::MissingSessionId {
                action: action.to_string(),
            }
            .into());
        }
    };

    let session = records
        .load_session(session_id)
        .await?
        .ok_or_else(|| EngineError::SessionNotFound {
            session_id: session_id.to_string(),
        })?;

    if session.workflow_type != workflow_type {
        return Err(ValidationError::WorkflowMismatch {
            session_id: session_id.to_string(),
            expected: workflow_type.to_string(),
            actual: session.workflow_type,
        }
        .into());
    }

    Ok(session)
}
