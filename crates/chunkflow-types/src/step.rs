//! Step, chunk and progress result types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of a lifecycle step.
///
/// Exactly one of `state` (a progress snapshot to continue from) or `result`
/// (the terminal artifact) is set on a well-formed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> StepResult<T> {
    pub fn finished(result: T) -> Self {
        Self {
            success: true,
            state: None,
            result: Some(result),
            error: None,
        }
    }

    pub fn blocked(state: Value, error: impl Into<String>) -> Self {
        Self {
            success: false,
            state: Some(state),
            result: None,
            error: Some(error.into()),
        }
    }
}

/// A completed chunk's payload, as handed to the synthesize callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkSummary {
    pub chunk_id: String,
    pub name: String,
    /// Plan-order index of the chunk.
    pub index: usize,
    pub result: Value,
}

/// Per-chunk outcome of one shard call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRunResult {
    pub chunk_id: String,
    pub success: bool,
    /// Number of step callbacks that succeeded during this call.
    pub steps: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChunkRunResult {
    pub fn succeeded(chunk_id: impl Into<String>, steps: u32, result: Option<Value>) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            success: true,
            steps,
            result,
            error: None,
        }
    }

    pub fn failed(chunk_id: impl Into<String>, steps: u32, error: impl Into<String>) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            success: false,
            steps,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Pending vs completed chunk ids, both in plan order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub pending: Vec<String>,
    pub completed: Vec<String>,
}
