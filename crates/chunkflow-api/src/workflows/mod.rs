//! Workflows shipped with the `chunkflow` binary.

pub mod document_digest;
