//! Shared fixtures for the lifecycle tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chunkflow_core::storage::memory::InMemorySessionStore;
use chunkflow_core::storage::session_store::SessionStore;
use chunkflow_core::workflow::dispatcher::ActionDispatcher;
use chunkflow_core::workflow::engine::WorkflowEngine;
use chunkflow_core::workflow::strategy::{ChunkedWorkflow, StartPlan, StartRequest};
use chunkflow_types::config::EngineConfig;
use chunkflow_types::error::WorkflowError;
use chunkflow_types::session::{ChunkChildState, ChunkDescriptor, ChunkSeed, WorkflowSession};
use chunkflow_types::step::ChunkSummary;
use serde_json::{json, Value};

/// Splits `params.words` into chunks of `params.per_chunk` words; each step
/// upper-cases one word. Synthesize joins the chunks in plan order.
#[derive(Default)]
pub struct ShoutWorkflow {
    pub synth_calls: Arc<AtomicUsize>,
    pub fetch_calls: Arc<AtomicUsize>,
}

impl ChunkedWorkflow for ShoutWorkflow {
    type Output = String;

    fn workflow_type(&self) -> &str {
        "shout"
    }

    async fn start(&self, request: &StartRequest) -> Result<StartPlan, WorkflowError> {
        let words: Vec<Value> = request.params["words"]
            .as_str()
            .ok_or_else(|| WorkflowError::InvalidInput("words is required".to_string()))?
            .split_whitespace()
            .map(|w| json!(w))
            .collect();
        let per_chunk = request.params["per_chunk"].as_u64().unwrap_or(1).max(1) as usize;

        let chunks = words
            .chunks(per_chunk)
            .enumerate()
            .map(|(i, items)| ChunkSeed::new(format!("chunk-{}", i + 1), format!("Part {}", i + 1), items.to_vec()))
            .collect();

        let mut extensions = serde_json::Map::new();
        extensions.insert("rows".to_string(), request.params["rows"].clone());

        Ok(StartPlan {
            chunks,
            preview: words.iter().take(3).cloned().collect(),
            max_items: request.params["max_items"].as_u64().unwrap_or(0) as usize,
            ordering: None,
            extensions,
        })
    }

    async fn step(
        &self,
        _chunk: &ChunkDescriptor,
        mut state: ChunkChildState,
    ) -> Result<ChunkChildState, WorkflowError> {
        let word = state
            .take_next()
            .and_then(|w| w.as_str().map(str::to_uppercase))
            .unwrap_or_default();
        let so_far = state.result.as_ref().and_then(Value::as_str).unwrap_or("");
        let joined = if so_far.is_empty() {
            word
        } else {
            format!("{so_far} {word}")
        };
        state.result = Some(json!(joined));
        Ok(state)
    }

    async fn synthesize(&self, summaries: Vec<ChunkSummary>) -> Result<String, WorkflowError> {
        self.synth_calls.fetch_add(1, Ordering::SeqCst);
        Ok(summaries
            .iter()
            .filter_map(|s| s.result.as_str())
            .collect::<Vec<_>>()
            .join(" | "))
    }

    async fn fetch_rows(&self, session: &WorkflowSession) -> Result<Vec<Value>, WorkflowError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let total = session.extensions.get("rows").and_then(Value::as_u64).unwrap_or(0);
        Ok((0..total).map(|i| json!({"row": i})).collect())
    }
}

pub struct Harness {
    pub store: Arc<InMemorySessionStore>,
    pub engine: Arc<WorkflowEngine<ShoutWorkflow, InMemorySessionStore>>,
    pub dispatcher: ActionDispatcher<ShoutWorkflow, InMemorySessionStore>,
    pub synth_calls: Arc<AtomicUsize>,
    pub fetch_calls: Arc<AtomicUsize>,
}

pub fn harness() -> Harness {
    let workflow = ShoutWorkflow::default();
    let synth_calls = Arc::clone(&workflow.synth_calls);
    let fetch_calls = Arc::clone(&workflow.fetch_calls);
    let store = Arc::new(InMemorySessionStore::new());
    let engine = Arc::new(WorkflowEngine::new(
        workflow,
        Arc::clone(&store),
        EngineConfig::default(),
    ));
    Harness {
        dispatcher: ActionDispatcher::new(Arc::clone(&engine)),
        store,
        engine,
        synth_calls,
        fetch_calls,
    }
}

/// Every stored record, sorted by key.
pub async fn snapshot(store: &InMemorySessionStore) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    for key in store.list_keys("").await.unwrap() {
        let value = store.load(&key).await.unwrap().unwrap();
        out.push((key, value));
    }
    out
}
