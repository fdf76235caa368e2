//! Built-in `document-digest` workflow.
//!
//! Splits a text document into paragraphs, groups them into sections (one
//! section per chunk) and digests one paragraph per step: word and character
//! counts plus a short headline taken from the first sentence. Synthesize
//! assembles the per-section digests in document order.
//!
//! Params accepted by `start`:
//! - `text` (required): the document body. Paragraphs are separated by blank
//!   lines.
//! - `title` (optional): stored on the session for status displays.
//! - `paragraphs_per_chunk` (optional, default 3).

use chunkflow_core::workflow::strategy::{offload_blocking, ChunkedWorkflow, StartPlan, StartRequest};
use chunkflow_types::error::WorkflowError;
use chunkflow_types::session::{
    ChunkChildState, ChunkDescriptor, ChunkSeed, DocumentOrdering, WorkflowSession,
};
use chunkflow_types::step::ChunkSummary;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const WORKFLOW_TYPE: &str = "document-digest";

const DEFAULT_PARAGRAPHS_PER_CHUNK: usize = 3;
const HEADLINE_MAX_CHARS: usize = 80;

/// One digested paragraph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParagraphDigest {
    pub paragraph_index: usize,
    pub position: usize,
    pub words: usize,
    pub chars: usize,
    pub headline: String,
}

/// Accumulated digest of one section (chunk).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionDigest {
    #[serde(default)]
    pub chunk_id: String,
    #[serde(default)]
    pub name: String,
    pub words: usize,
    pub chars: usize,
    pub paragraphs: Vec<ParagraphDigest>,
}

/// Final artifact produced by synthesize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentDigest {
    pub total_paragraphs: usize,
    pub total_words: usize,
    pub total_chars: usize,
    pub sections: Vec<SectionDigest>,
}

/// Paragraph digester.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentDigestWorkflow;

impl DocumentDigestWorkflow {
    pub fn new() -> Self {
        Self
    }
}

/// Split on blank lines, collapsing internal whitespace.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join(" "));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join(" "));
    }

    paragraphs
}

/// First sentence of `paragraph`, cut to a fixed width on a char boundary.
pub fn headline(paragraph: &str) -> String {
    let sentence = paragraph
        .find(['.', '!', '?'])
        .map(|end| &paragraph[..=end])
        .unwrap_or(paragraph)
        .trim();

    if sentence.chars().count() <= HEADLINE_MAX_CHARS {
        return sentence.to_string();
    }
    let cut: String = sentence.chars().take(HEADLINE_MAX_CHARS - 3).collect();
    format!("{}...", cut.trim_end())
}

fn digest_paragraph(item: &Value) -> Result<ParagraphDigest, WorkflowError> {
    let text = item["text"]
        .as_str()
        .ok_or_else(|| WorkflowError::Failed("paragraph item has no text".to_string()))?;
    let index_of = |field: &str| {
        item[field]
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| WorkflowError::Failed(format!("paragraph item has no {field}")))
    };

    Ok(ParagraphDigest {
        paragraph_index: index_of("paragraph_index")?,
        position: index_of("position")?,
        words: text.split_whitespace().count(),
        chars: text.chars().count(),
        headline: headline(text),
    })
}

impl ChunkedWorkflow for DocumentDigestWorkflow {
    type Output = DocumentDigest;

    fn workflow_type(&self) -> &str {
        WORKFLOW_TYPE
    }

    async fn start(&self, request: &StartRequest) -> Result<StartPlan, WorkflowError> {
        let text = request.params["text"]
            .as_str()
            .ok_or_else(|| WorkflowError::InvalidInput("params.text is required".to_string()))?;
        let per_chunk = match request.params.get("paragraphs_per_chunk") {
            None | Some(Value::Null) => DEFAULT_PARAGRAPHS_PER_CHUNK,
            Some(value) => match value.as_u64() {
                Some(n) if n >= 1 => n as usize,
                _ => {
                    return Err(WorkflowError::InvalidInput(
                        "paragraphs_per_chunk must be a positive integer".to_string(),
                    ));
                }
            },
        };

        let paragraphs = split_paragraphs(text);
        if paragraphs.is_empty() {
            return Err(WorkflowError::InvalidInput(
                "params.text contains no paragraphs".to_string(),
            ));
        }

        let chunks: Vec<ChunkSeed> = paragraphs
            .chunks(per_chunk)
            .enumerate()
            .map(|(chunk_index, group)| {
                let items = group
                    .iter()
                    .enumerate()
                    .map(|(paragraph_index, text)| {
                        json!({
                            "paragraph_index": paragraph_index,
                            "position": chunk_index * per_chunk + paragraph_index,
                            "text": text,
                        })
                    })
                    .collect();
                ChunkSeed::new(
                    format!("section-{}", chunk_index + 1),
                    format!("Section {}", chunk_index + 1),
                    items,
                )
            })
            .collect();

        let preview = paragraphs
            .iter()
            .enumerate()
            .map(|(position, text)| json!({"position": position, "headline": headline(text)}))
            .collect();

        let mut extensions = Map::new();
        if let Some(title) = request.params["title"].as_str() {
            extensions.insert("title".to_string(), json!(title));
        }
        extensions.insert("paragraph_count".to_string(), json!(paragraphs.len()));

        Ok(StartPlan {
            chunks,
            preview,
            max_items: paragraphs.len(),
            // `position` is unique and increases with (chunk_index, paragraph_index).
            ordering: Some(DocumentOrdering {
                order_key: "position".to_string(),
                secondary_key: Some("chunk_index".to_string()),
            }),
            extensions,
        })
    }

    async fn step(
        &self,
        chunk: &ChunkDescriptor,
        mut state: ChunkChildState,
    ) -> Result<ChunkChildState, WorkflowError> {
        let Some(item) = state.take_next() else {
            return Ok(state);
        };
        let paragraph = offload_blocking(move || digest_paragraph(&item)).await?;

        let mut section: SectionDigest = match state.result.take() {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| WorkflowError::Failed(format!("corrupt section digest: {e}")))?,
            None => SectionDigest {
                chunk_id: chunk.chunk_id.clone(),
                name: chunk.name.clone(),
                ..Default::default()
            },
        };
        section.words += paragraph.words;
        section.chars += paragraph.chars;
        section.paragraphs.push(paragraph);

        state.result = Some(
            serde_json::to_value(&section)
                .map_err(|e| WorkflowError::Failed(format!("section digest: {e}")))?,
        );
        Ok(state)
    }

    async fn synthesize(&self, summaries: Vec<ChunkSummary>) -> Result<DocumentDigest, WorkflowError> {
        let mut sections = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let mut section: SectionDigest = match summary.result {
                Value::Null => SectionDigest::default(),
                value => serde_json::from_value(value).map_err(|e| {
                    WorkflowError::Failed(format!("section {} digest: {e}", summary.chunk_id))
                })?,
            };
            section.chunk_id = summary.chunk_id;
            section.name = summary.name;
            sections.push(section);
        }

        Ok(DocumentDigest {
            total_paragraphs: sections.iter().map(|s| s.paragraphs.len()).sum(),
            total_words: sections.iter().map(|s| s.words).sum(),
            total_chars: sections.iter().map(|s| s.chars).sum(),
            sections,
        })
    }

    async fn fetch_rows(&self, session: &WorkflowSession) -> Result<Vec<Value>, WorkflowError> {
        let mut rows = Vec::new();
        // Emitted last section first; the declared ordering restores document order.
        for chunk in session.plan.chunks().iter().rev() {
            for item in &chunk.items {
                let text = item["text"].as_str().unwrap_or_default();
                rows.push(json!({
                    "position": item["position"],
                    "chunk_id": chunk.chunk_id,
                    "chunk_index": chunk.index,
                    "paragraph_index": item["paragraph_index"],
                    "words": text.split_whitespace().count(),
                    "text": text,
                }));
            }
        }
        tracing::debug!(session_id = %session.session_id, rows = rows.len(), "document rows fetched");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkflow_types::session::ChunkPlan;

    const DOC: &str = "The quick fox jumps. Then it rests.\n\n\
        Second paragraph here\nspans two lines.\n\n\n\
        Third one!\n\n\
        Fourth and final paragraph.";

    fn start_request(params: Value) -> StartRequest {
        StartRequest::new(params)
    }

    #[test]
    fn test_split_paragraphs_on_blank_lines() {
        let paragraphs = split_paragraphs(DOC);
        assert_eq!(paragraphs.len(), 4);
        assert_eq!(paragraphs[1], "Second paragraph here spans two lines.");
        assert!(split_paragraphs("  \n\n \n").is_empty());
    }

    #[test]
    fn test_headline_takes_first_sentence() {
        assert_eq!(headline("The quick fox jumps. Then it rests."), "The quick fox jumps.");
        assert_eq!(headline("no terminator"), "no terminator");

        let long = "word ".repeat(40);
        let h = headline(&long);
        assert!(h.ends_with("..."));
        assert!(h.chars().count() <= HEADLINE_MAX_CHARS);
    }

    #[tokio::test]
    async fn test_start_builds_sections_and_ordering() {
        let plan = DocumentDigestWorkflow
            .start(&start_request(json!({"text": DOC, "paragraphs_per_chunk": 3, "title": "Foxes"})))
            .await
            .unwrap();

        assert_eq!(plan.chunks.len(), 2);
        assert_eq!(plan.chunks[0].chunk_id, "section-1");
        assert_eq!(plan.chunks[0].items.len(), 3);
        assert_eq!(plan.chunks[1].items[0]["position"], 3);
        assert_eq!(plan.max_items, 4);
        assert_eq!(plan.preview[0]["headline"], "The quick fox jumps.");
        assert_eq!(plan.extensions["title"], "Foxes");
        assert_eq!(plan.ordering.unwrap().order_key, "position");
    }

    #[tokio::test]
    async fn test_start_rejects_bad_input() {
        let err = DocumentDigestWorkflow.start(&start_request(json!({}))).await.unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidInput(_)));

        let err = DocumentDigestWorkflow
            .start(&start_request(json!({"text": "\n\n"})))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            WorkflowError::InvalidInput("params.text contains no paragraphs".to_string())
        );

        let err = DocumentDigestWorkflow
            .start(&start_request(json!({"text": "a", "paragraphs_per_chunk": 0})))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_step_digests_one_paragraph_per_call() {
        let workflow = DocumentDigestWorkflow;
        let plan = workflow
            .start(&start_request(json!({"text": DOC, "paragraphs_per_chunk": 2})))
            .await
            .unwrap();
        let chunk_plan = ChunkPlan::from_seeds(plan.chunks).unwrap();
        let chunk = &chunk_plan.chunks()[0];

        let state = ChunkChildState::seeded("s-1", chunk);
        let state = workflow.step(chunk, state).await.unwrap();
        assert_eq!(state.remaining.len(), 1);
        let state = workflow.step(chunk, state).await.unwrap();
        assert!(state.remaining.is_empty());

        let section: SectionDigest = serde_json::from_value(state.result.unwrap()).unwrap();
        assert_eq!(section.paragraphs.len(), 2);
        assert_eq!(section.paragraphs[0].words, 7);
        assert_eq!(section.paragraphs[1].headline, "Second paragraph here spans two lines.");
        assert_eq!(section.words, 7 + 6);
    }

    #[tokio::test]
    async fn test_synthesize_keeps_summary_order() {
        let section = |id: &str, words: usize| ChunkSummary {
            chunk_id: id.to_string(),
            name: id.to_uppercase(),
            index: 0,
            result: json!({"words": words, "chars": words * 5, "paragraphs": []}),
        };

        let digest = DocumentDigestWorkflow
            .synthesize(vec![section("section-1", 3), section("section-2", 4)])
            .await
            .unwrap();

        assert_eq!(digest.total_words, 7);
        assert_eq!(digest.total_chars, 35);
        assert_eq!(digest.sections[0].chunk_id, "section-1");
        assert_eq!(digest.sections[1].name, "SECTION-2");
    }

    #[tokio::test]
    async fn test_fetch_rows_covers_every_paragraph() {
        use chunkflow_types::session::BatchState;

        let workflow = DocumentDigestWorkflow;
        let plan = workflow
            .start(&start_request(json!({"text": DOC, "paragraphs_per_chunk": 3})))
            .await
            .unwrap();
        let session = WorkflowSession::new(
            "s-1".to_string(),
            WORKFLOW_TYPE.to_string(),
            ChunkPlan::from_seeds(plan.chunks).unwrap(),
            BatchState::new(2, plan.max_items),
        );

        let rows = workflow.fetch_rows(&session).await.unwrap();
        assert_eq!(rows.len(), 4);
        let mut positions: Vec<u64> = rows.iter().map(|r| r["position"].as_u64().unwrap()).collect();
        positions.sort();
        assert_eq!(positions, vec![0, 1, 2, 3]);
        assert_eq!(rows[0]["chunk_id"], "section-2");
    }
}
