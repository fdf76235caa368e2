//! Persisted session and chunk records.
//!
//! A workflow session is stored as one parent record keyed by its session id.
//! Each chunk of the session's plan owns a child record keyed by a derived id
//! (see [`child_id`]). Both records carry a `schema_version` so that stored
//! state can evolve without breaking older sessions.

use std::collections::{HashSet, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Current version of the persisted session and child record layout.
pub const SESSION_SCHEMA_VERSION: u32 = 1;

/// Separator between the session id and the chunk id in a child record key.
pub const CHILD_KEY_SEPARATOR: &str = "::chunk::";

/// Derive the storage key for a chunk's child record.
pub fn child_id(session_id: &str, chunk_id: &str) -> String {
    format!("{session_id}{CHILD_KEY_SEPARATOR}{chunk_id}")
}

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle position of a session.
///
/// `Start` is implicit (no record exists yet); a persisted session is
/// `started` after the plan is built, `sharding` once any shard call has been
/// accepted and `done` after the synthesize result has been accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Started,
    Sharding,
    Done,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Started => write!(f, "started"),
            SessionStatus::Sharding => write!(f, "sharding"),
            SessionStatus::Done => write!(f, "done"),
        }
    }
}

// ---------------------------------------------------------------------------
// Chunk plan
// ---------------------------------------------------------------------------

/// A chunk as proposed by a workflow's start callback, before it is indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkSeed {
    pub chunk_id: String,
    pub name: String,
    /// Work items that seed the chunk's sub-queue.
    #[serde(default)]
    pub items: Vec<Value>,
}

impl ChunkSeed {
    pub fn new(chunk_id: impl Into<String>, name: impl Into<String>, items: Vec<Value>) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            name: name.into(),
            items,
        }
    }
}

/// One unit of work in a session's plan. Immutable once the plan is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    /// Unique within a session.
    pub chunk_id: String,
    /// Human-readable display name.
    pub name: String,
    /// Position in plan order (0-based).
    pub index: usize,
    #[serde(default)]
    pub items: Vec<Value>,
}

/// The ordered set of chunk descriptors computed once at workflow start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkPlan {
    chunks: Vec<ChunkDescriptor>,
}

impl ChunkPlan {
    /// Build a plan from seeds, assigning plan-order indices.
    ///
    /// Returns the duplicated ids (in first-duplicate order) when any chunk id
    /// appears more than once.
    pub fn from_seeds(seeds: Vec<ChunkSeed>) -> Result<Self, Vec<String>> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for seed in &seeds {
            if !seen.insert(seed.chunk_id.as_str()) && !duplicates.contains(&seed.chunk_id) {
                duplicates.push(seed.chunk_id.clone());
            }
        }
        if !duplicates.is_empty() {
            return Err(duplicates);
        }

        let chunks = seeds
            .into_iter()
            .enumerate()
            .map(|(index, seed)| ChunkDescriptor {
                chunk_id: seed.chunk_id,
                name: seed.name,
                index,
                items: seed.items,
            })
            .collect();

        Ok(Self { chunks })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Chunks in plan order.
    pub fn chunks(&self) -> &[ChunkDescriptor] {
        &self.chunks
    }

    /// Chunk ids in plan order.
    pub fn ids(&self) -> Vec<String> {
        self.chunks.iter().map(|c| c.chunk_id.clone()).collect()
    }

    pub fn get(&self, chunk_id: &str) -> Option<&ChunkDescriptor> {
        self.chunks.iter().find(|c| c.chunk_id == chunk_id)
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.get(chunk_id).is_some()
    }
}

// ---------------------------------------------------------------------------
// Batch cache state
// ---------------------------------------------------------------------------

/// Ordering declared for full-document result sets.
///
/// Rows are deduplicated by `order_key` (first occurrence wins) and sorted by
/// `(order_key, secondary_key)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentOrdering {
    pub order_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_key: Option<String>,
}

/// Lazily filled result cache attached to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchState {
    /// Rows per page. Always >= 1 once a session is persisted.
    pub batch_size: usize,
    /// Declared upper bound on cached rows (0 = no cap).
    #[serde(default)]
    pub max_items: usize,
    /// Flips to true exactly once, after a successful fetch.
    #[serde(default)]
    pub cache_ready: bool,
    #[serde(default)]
    pub rows: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ordering: Option<DocumentOrdering>,
}

impl BatchState {
    pub fn new(batch_size: usize, max_items: usize) -> Self {
        Self {
            batch_size,
            max_items,
            cache_ready: false,
            rows: Vec::new(),
            ordering: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Session record
// ---------------------------------------------------------------------------

/// The durable parent record of one workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSession {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Opaque, caller-visible id. Never changes once created.
    pub session_id: String,
    /// Which workflow implementation owns this session.
    pub workflow_type: String,
    pub status: SessionStatus,
    pub plan: ChunkPlan,
    pub batch: BatchState,
    /// Accepted synthesize output; present only when `status` is `done`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Open extension map for workflow-specific metadata.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_schema_version() -> u32 {
    SESSION_SCHEMA_VERSION
}

impl WorkflowSession {
    pub fn new(
        session_id: String,
        workflow_type: String,
        plan: ChunkPlan,
        batch: BatchState,
    ) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SESSION_SCHEMA_VERSION,
            session_id,
            workflow_type,
            status: SessionStatus::Started,
            plan,
            batch,
            result: None,
            extensions: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// Chunk child record
// ---------------------------------------------------------------------------

/// Execution status of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for ChildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildStatus::Pending => write!(f, "pending"),
            ChildStatus::Running => write!(f, "running"),
            ChildStatus::Completed => write!(f, "completed"),
            ChildStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Per-chunk state, owned by whichever executor processes that chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkChildState {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub child_id: String,
    pub session_id: String,
    pub chunk_id: String,
    /// Sub-queue still to be processed. Empty means the chunk is complete.
    #[serde(default)]
    pub remaining: VecDeque<Value>,
    /// Item currently (or last) being processed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<Value>,
    /// Payload handed to synthesize once the chunk completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub status: ChildStatus,
    #[serde(default)]
    pub steps_taken: u32,
    pub updated_at: DateTime<Utc>,
}

impl ChunkChildState {
    /// Fresh state for a chunk that has never been processed.
    pub fn seeded(session_id: &str, chunk: &ChunkDescriptor) -> Self {
        Self {
            schema_version: SESSION_SCHEMA_VERSION,
            child_id: child_id(session_id, &chunk.chunk_id),
            session_id: session_id.to_string(),
            chunk_id: chunk.chunk_id.clone(),
            remaining: chunk.items.iter().cloned().collect(),
            current: None,
            result: None,
            error: None,
            status: ChildStatus::Pending,
            steps_taken: 0,
            updated_at: Utc::now(),
        }
    }

    /// A chunk is complete when its sub-queue has been drained.
    pub fn is_complete(&self) -> bool {
        self.remaining.is_empty()
    }

    /// Pop the next sub-queue item and mark it as `current`.
    pub fn take_next(&mut self) -> Option<Value> {
        let item = self.remaining.pop_front()?;
        self.current = Some(item.clone());
        Some(item)
    }

    /// Stamp `updated_at` with the current time.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
