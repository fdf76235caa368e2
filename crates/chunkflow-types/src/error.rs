use thiserror::Error;

/// Errors from repository operations (used by the storage ports in chunkflow-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors raised by workflow callbacks (start, step, synthesize, fetch).
///
/// These are the embedding application's failures. The engine never raises
/// them itself; it captures them at the smallest scope and reports them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("invalid workflow input: {0}")]
    InvalidInput(String),

    #[error("workflow callback failed: {0}")]
    Failed(String),

    #[error("operation not supported by workflow '{0}'")]
    Unsupported(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }

    #[test]
    fn test_workflow_error_display() {
        let err = WorkflowError::Unsupported("document-digest".to_string());
        assert_eq!(
            err.to_string(),
            "operation not supported by workflow 'document-digest'"
        );

        let err = WorkflowError::InvalidInput("missing text".to_string());
        assert!(err.to_string().contains("missing text"));
    }
}
