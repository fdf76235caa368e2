//! Transport-agnostic action protocol.
//!
//! Every external call is one [`ActionRequest`]; every reply is one
//! [`ActionResponse`]. Errors are reported in-band through [`ErrorEnvelope`]
//! so that a caller always receives a well-formed response.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::step::{ChunkRunResult, StepResult};

/// Allowed action vocabulary, as reported in unknown-action errors.
pub const ALLOWED_ACTIONS: &str = "start | shard | synthesize | batch | document";

/// A normalized action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Start,
    Shard,
    Synthesize,
    Batch,
    Document,
}

impl Action {
    /// Parse a raw action name, resolving aliases (`chunk` -> `shard`,
    /// `fetch` -> `start`). Case-insensitive and whitespace-tolerant.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "start" | "fetch" => Some(Action::Start),
            "shard" | "chunk" => Some(Action::Shard),
            "synthesize" => Some(Action::Synthesize),
            "batch" => Some(Action::Batch),
            "document" => Some(Action::Document),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Shard => "shard",
            Action::Synthesize => "synthesize",
            Action::Batch => "batch",
            Action::Document => "document",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One external call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Raw action name; aliases are resolved by the dispatcher.
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Explicit chunk selection for `shard`. Empty means "all pending".
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunk_ids: Vec<String>,
    /// Signed so that negative indices reach validation instead of failing
    /// deserialization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_index: Option<i64>,
    /// Workflow input for `start`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
}

impl ActionRequest {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_chunk_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.chunk_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_batch_index(mut self, batch_index: i64) -> Self {
        self.batch_index = Some(batch_index);
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

/// What the caller should do after a shard call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    Shard,
    Synthesize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartResponse {
    pub action: String,
    pub session_id: String,
    pub batch_count: usize,
    pub chunk_count: usize,
    pub preview_results: Vec<Value>,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardResponse {
    pub action: String,
    /// False when any chunk in this call failed; per-chunk results are still complete.
    pub success: bool,
    pub session_id: String,
    pub chunks_requested: Vec<String>,
    pub chunk_results: Vec<ChunkRunResult>,
    pub chunks_remaining: usize,
    pub pending_chunk_ids: Vec<String>,
    pub completed_chunk_ids: Vec<String>,
    pub next_action: NextAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizeResponse {
    pub action: String,
    pub session_id: String,
    #[serde(flatten)]
    pub outcome: StepResult<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub action: String,
    pub session_id: String,
    pub batch_index: usize,
    pub batch_count: usize,
    pub batch: Vec<Value>,
    pub status: String,
}

/// Full-document view. Paged replies carry `batch_index`/`batch_count`;
/// whole-set replies carry `count` instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentResponse {
    pub action: String,
    pub session_id: String,
    pub rows: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    /// Rows before dedupe.
    pub total_count: usize,
    pub status: String,
}

/// Machine-readable error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Timeout,
    PendingBlock,
    Cancelled,
    Stalled,
    Workflow,
    Internal,
}

/// Error reply for any action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub action: String,
    pub status: String,
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_count: Option<usize>,
}

impl ErrorEnvelope {
    pub fn new(action: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            status: "error".to_string(),
            kind,
            message: message.into(),
            session_id: None,
            batch_index: None,
            batch_count: None,
        }
    }
}

/// Any reply the dispatcher can produce.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ActionResponse {
    Start(StartResponse),
    Shard(ShardResponse),
    Synthesize(SynthesizeResponse),
    Batch(BatchResponse),
    Document(DocumentResponse),
    Error(ErrorEnvelope),
}

impl ActionResponse {
    pub fn is_error(&self) -> bool {
        matches!(self, ActionResponse::Error(_))
    }

    pub fn error(&self) -> Option<&ErrorEnvelope> {
        match self {
            ActionResponse::Error(e) => Some(e),
            _ => None,
        }
    }
}
