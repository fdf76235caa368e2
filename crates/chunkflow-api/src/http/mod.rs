//! HTTP/REST API layer for chunkflow.
//!
//! Axum-based API at `/api/v1/`: the action protocol endpoint plus SSE
//! auto-complete streams, with CORS and request tracing.

pub mod error;
pub mod handlers;
pub mod router;
