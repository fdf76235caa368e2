//! Storage abstractions for chunkflow.
//!
//! Defines the key/value session store trait, an in-memory implementation,
//! and the typed record layer the engine uses on top of it.
//! The SQLite implementation lives in chunkflow-infra.

pub mod memory;
pub mod records;
pub mod session_store;
