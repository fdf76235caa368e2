//! Shared domain types for chunkflow.
//!
//! This crate contains the types used across the chunked workflow engine:
//! persisted session and chunk records, the action protocol envelopes,
//! engine configuration and the error types shared by the storage ports.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod step;
