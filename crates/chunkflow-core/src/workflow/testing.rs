//! Scriptable workflow used by the engine's unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chunkflow_types::error::WorkflowError;
use chunkflow_types::session::{
    BatchState, ChunkChildState, ChunkDescriptor, ChunkPlan, ChunkSeed, DocumentOrdering,
    WorkflowSession,
};
use chunkflow_types::step::ChunkSummary;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::strategy::{ChunkedWorkflow, StartPlan, StartRequest};

pub const COUNTING: &str = "counting";

/// Chunk `chunk-i` carries the items `1..=items`; each step adds one item
/// to the chunk's running total.
pub fn seeds(chunks: usize, items: usize) -> Vec<ChunkSeed> {
    (1..=chunks)
        .map(|i| {
            ChunkSeed::new(
                format!("chunk-{i}"),
                format!("Chunk {i}"),
                (1..=items).map(|n| json!(n)).collect(),
            )
        })
        .collect()
}

pub fn counting_session(session_id: &str, chunks: usize, items: usize) -> WorkflowSession {
    let plan = ChunkPlan::from_seeds(seeds(chunks, items)).unwrap();
    WorkflowSession::new(
        session_id.to_string(),
        COUNTING.to_string(),
        plan,
        BatchState::new(5, 0),
    )
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tally {
    pub chunk_ids: Vec<String>,
    pub total: i64,
}

#[derive(Default)]
pub struct CountingWorkflow {
    failing: HashSet<String>,
    panicking: HashSet<String>,
    stuck: HashSet<String>,
    slow: Option<(String, Duration)>,
    delay: Option<Duration>,
    fetch_delay: Option<Duration>,
    step_calls: Arc<AtomicUsize>,
    synth_calls: Arc<AtomicUsize>,
    fetch_calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl CountingWorkflow {
    pub fn failing(mut self, chunk_id: &str) -> Self {
        self.failing.insert(chunk_id.to_string());
        self
    }

    pub fn panicking(mut self, chunk_id: &str) -> Self {
        self.panicking.insert(chunk_id.to_string());
        self
    }

    pub fn stuck(mut self, chunk_id: &str) -> Self {
        self.stuck.insert(chunk_id.to_string());
        self
    }

    pub fn slow(mut self, chunk_id: &str, delay: Duration) -> Self {
        self.slow = Some((chunk_id.to_string(), delay));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    pub fn step_calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.step_calls)
    }

    pub fn synth_calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.synth_calls)
    }

    pub fn fetch_calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.fetch_calls)
    }

    pub fn peak_concurrency(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.peak)
    }
}

impl ChunkedWorkflow for CountingWorkflow {
    type Output = Tally;

    fn workflow_type(&self) -> &str {
        COUNTING
    }

    /// Params: `{"chunks": n, "items": k, "rows": m | [..], "max_items": c,
    /// "preview": p, "ordering": {..}}`.
    async fn start(&self, request: &StartRequest) -> Result<StartPlan, WorkflowError> {
        let params = &request.params;
        let chunks = params["chunks"].as_u64().unwrap_or(0) as usize;
        let items = params["items"].as_u64().unwrap_or(1) as usize;
        if params.get("reject").is_some() {
            return Err(WorkflowError::InvalidInput("rejected by params".to_string()));
        }

        let mut plan = StartPlan {
            chunks: seeds(chunks, items),
            max_items: params["max_items"].as_u64().unwrap_or(0) as usize,
            preview: (0..params["preview"].as_u64().unwrap_or(0))
                .map(|n| json!({"n": n}))
                .collect(),
            ..Default::default()
        };
        if let Some(dup) = params["duplicate"].as_str() {
            plan.chunks.push(ChunkSeed::new(dup, "Duplicate", vec![json!(1)]));
        }
        if let Some(ordering) = params.get("ordering") {
            plan.ordering = serde_json::from_value::<DocumentOrdering>(ordering.clone()).ok();
        }
        if let Some(rows) = params.get("rows") {
            plan.extensions.insert("rows".to_string(), rows.clone());
        }
        Ok(plan)
    }

    async fn step(
        &self,
        chunk: &ChunkDescriptor,
        mut state: ChunkChildState,
    ) -> Result<ChunkChildState, WorkflowError> {
        self.step_calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some((slow_id, delay)) = &self.slow {
            if slow_id == &chunk.chunk_id {
                tokio::time::sleep(*delay).await;
            }
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panicking.contains(&chunk.chunk_id) {
            panic!("{} panicked", chunk.chunk_id);
        }
        if self.failing.contains(&chunk.chunk_id) {
            return Err(WorkflowError::Failed(format!("{} exploded", chunk.chunk_id)));
        }
        if self.stuck.contains(&chunk.chunk_id) {
            return Ok(state);
        }

        let item = state.take_next().and_then(|v| v.as_i64()).unwrap_or(0);
        let total = state.result.as_ref().and_then(Value::as_i64).unwrap_or(0);
        state.result = Some(json!(total + item));
        Ok(state)
    }

    async fn synthesize(&self, summaries: Vec<ChunkSummary>) -> Result<Tally, WorkflowError> {
        self.synth_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Tally {
            chunk_ids: summaries.iter().map(|s| s.chunk_id.clone()).collect(),
            total: summaries.iter().filter_map(|s| s.result.as_i64()).sum(),
        })
    }

    async fn fetch_rows(&self, session: &WorkflowSession) -> Result<Vec<Value>, WorkflowError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        match session.extensions.get("rows") {
            Some(Value::Array(rows)) => Ok(rows.clone()),
            Some(Value::Number(n)) => Ok((0..n.as_u64().unwrap_or(0))
                .map(|i| json!({"n": i}))
                .collect()),
            _ => Err(WorkflowError::Unsupported(COUNTING.to_string())),
        }
    }
}
