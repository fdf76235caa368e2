//! Chunked workflow engine.
//!
//! This module contains the lifecycle machinery:
//! - `strategy` -- the per-workflow callback trait (start, step, synthesize, fetch)
//! - `progress` -- pending/completed derivation from persisted child records
//! - `fanout` -- bounded-concurrency execution of selected chunks
//! - `batch` -- lazily filled, paginated result cache
//! - `document` -- dedupe/sort/paginate helpers for full-document result sets
//! - `guard` -- shared request guardrails (session existence, workflow type)
//! - `heartbeat` -- keep-alive signalling for long auto-complete runs
//! - `engine` -- `start -> shard* -> synthesize` lifecycle and auto-complete
//! - `dispatcher` -- action protocol routing with in-band error envelopes

pub mod batch;
pub mod dispatcher;
pub mod document;
pub mod engine;
pub mod error;
pub mod fanout;
pub mod guard;
pub mod heartbeat;
pub mod progress;
pub mod strategy;

#[cfg(test)]
pub(crate) mod testing;
