//! Chunked workflow engine and storage port definitions for chunkflow.
//!
//! This crate defines the session store "port" that the infrastructure layer
//! implements, and the engine that drives a workflow through
//! `start -> shard* -> synthesize`. It depends only on `chunkflow-types` --
//! never on `chunkflow-infra` or any database/IO crate.

pub mod storage;
pub mod workflow;
